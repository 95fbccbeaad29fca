//! Mocks and fixtures shared by conduit tests.

pub mod fixtures;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::{HttpClient, Integration, ModelClient, Notifier};
use conduit_core::types::{DeliveryReceipt, FlowEvent, HttpRequest, HttpResponse, Inference};
use conduit_core::work::WorkItem;

/// Model client returning scripted inferences.
///
/// Scripted responses are used in order; once exhausted every call gets the
/// fallback response.
pub struct MockModel {
    scripted: Mutex<VecDeque<Result<Inference>>>,
    fallback: Inference,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockModel {
    /// Always answer `decision` with the given confidence.
    pub fn confident(decision: Value, confidence: f64) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: Inference {
                decision,
                confidence,
                reasoning: "mock".to_string(),
            },
            delay: None,
            calls: Mutex::new(vec![]),
        }
    }

    pub fn then(self, response: Result<Inference>) -> Self {
        self.scripted
            .lock()
            .expect("mock lock poisoned")
            .push_back(response);
        self
    }

    pub fn failing_once(self, message: &str) -> Self {
        self.then(Err(ConduitError::Model(message.to_string())))
    }

    /// Sleep before answering, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(model, prompt)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }
}

impl ModelClient for MockModel {
    fn infer(&self, model: &str, prompt: &str, _data: &Value) -> BoxFuture<'_, Result<Inference>> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push((model.to_string(), prompt.to_string()));
        let next = self.scripted.lock().expect("mock lock poisoned").pop_front();

        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        })
    }
}

/// HTTP client answering from a per-URL table. Unknown URLs get
/// `200 {"ok": true}`.
#[derive(Default)]
pub struct MockHttp {
    responses: Mutex<HashMap<String, HttpResponse>>,
    failures: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, status: u16, body: Value) -> Self {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .insert(url.to_string(), HttpResponse { status, body });
        self
    }

    /// Fail the first `times` requests to `url` with a transport error.
    pub fn fail_times(self, url: &str, times: usize) -> Self {
        self.failures
            .lock()
            .expect("mock lock poisoned")
            .insert(url.to_string(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

impl HttpClient for MockHttp {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let url = request.url.clone();
            self.requests
                .lock()
                .expect("mock lock poisoned")
                .push(request);

            {
                let mut failures = self.failures.lock().expect("mock lock poisoned");
                if let Some(remaining) = failures.get_mut(&url) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(ConduitError::Http(format!("connection refused: {}", url)));
                    }
                }
            }

            Ok(self
                .responses
                .lock()
                .expect("mock lock poisoned")
                .get(&url)
                .cloned()
                .unwrap_or(HttpResponse {
                    status: 200,
                    body: json!({ "ok": true }),
                }))
        })
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub channel: String,
    pub targets: Vec<String>,
    pub body: Value,
}

/// Notifier that records instead of delivering.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().expect("mock lock poisoned").clone()
    }

    pub fn sent_on(&self, channel: &str) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.channel == channel)
            .collect()
    }

    fn record(&self, channel: &str, targets: Vec<String>, body: Value) -> DeliveryReceipt {
        self.sent
            .lock()
            .expect("mock lock poisoned")
            .push(SentNotification {
                channel: channel.to_string(),
                targets: targets.clone(),
                body,
            });
        DeliveryReceipt::new(channel, targets)
    }
}

impl Notifier for RecordingNotifier {
    fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<DeliveryReceipt>> {
        let receipt = self.record(
            "email",
            recipients.to_vec(),
            json!({ "subject": subject, "body": body }),
        );
        Box::pin(async move { Ok(receipt) })
    }

    fn send_slack(&self, channels: &[String], text: &str) -> BoxFuture<'_, Result<DeliveryReceipt>> {
        let receipt = self.record("slack", channels.to_vec(), json!(text));
        Box::pin(async move { Ok(receipt) })
    }

    fn send_webhook(&self, url: &str, payload: &Value) -> BoxFuture<'_, Result<DeliveryReceipt>> {
        let receipt = self.record("webhook", vec![url.to_string()], payload.clone());
        Box::pin(async move { Ok(receipt) })
    }
}

type IntegrationFn = dyn Fn(Value, Value) -> Result<Value> + Send + Sync;

/// Integration backed by a closure. Counts its invocations.
pub struct FnIntegration {
    name: String,
    func: Box<IntegrationFn>,
    calls: AtomicUsize,
}

impl FnIntegration {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
            calls: AtomicUsize::new(0),
        }
    }

    /// Echoes its parameters back.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, |params, _data| Ok(params))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Integration for FnIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, parameters: Value, data: Value) -> BoxFuture<'_, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.func)(parameters, data);
        Box::pin(async move { result })
    }
}

/// Wait for the next work item or approval request on the bus.
pub async fn next_work_item(rx: &mut broadcast::Receiver<FlowEvent>) -> Option<WorkItem> {
    loop {
        match rx.recv().await {
            Ok(FlowEvent::WorkItemCreated { item }) | Ok(FlowEvent::ApprovalRequested { item }) => {
                return Some(item)
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Collect the names of every event already buffered on `rx`.
pub fn drain_event_names(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}
