use std::collections::HashMap;
use std::sync::Arc;

use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::Integration;

/// Registry of named integrations available to `automation` steps.
#[derive(Default)]
pub struct IntegrationRegistry {
    integrations: HashMap<String, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an integration under its own name, replacing any previous one.
    pub fn register(&mut self, integration: impl Integration) {
        let name = integration.name().to_string();
        self.integrations.insert(name, Arc::new(integration));
    }

    pub fn register_arc(&mut self, integration: Arc<dyn Integration>) {
        self.integrations
            .insert(integration.name().to_string(), integration);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.integrations.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.integrations.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Look up and run an integration. An unknown name is a hard error.
    pub async fn execute(
        &self,
        name: &str,
        parameters: serde_json::Value,
        data: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let integration = self
            .get(name)
            .ok_or_else(|| ConduitError::UnknownIntegration(name.to_string()))?;
        integration.execute(parameters, data).await
    }
}
