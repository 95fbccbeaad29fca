use tracing::warn;

/// Environment passed to lifecycle hooks.
pub struct HookEnv<'a> {
    pub flow_id: &'a str,
    pub execution_id: &'a str,
    pub status: &'a str,
    pub error: Option<&'a str>,
}

impl HookEnv<'_> {
    fn vars(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("CONDUIT_FLOW_ID", self.flow_id),
            ("CONDUIT_EXECUTION_ID", self.execution_id),
            ("CONDUIT_STATUS", self.status),
            ("CONDUIT_ERROR", self.error.unwrap_or("")),
        ]
    }
}

/// Execute hook commands through `sh -c`.
/// Fire-and-forget: errors are logged, not propagated.
pub async fn run_hooks(commands: &[String], env: &HookEnv<'_>) {
    let vars = env.vars();
    for cmd in commands {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", cmd]);
        for (key, val) in &vars {
            command.env(key, val);
        }
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());
        match command.status().await {
            Ok(s) if !s.success() => warn!(hook = %cmd, code = s.code(), "Hook exited non-zero"),
            Err(e) => warn!(hook = %cmd, error = %e, "Hook failed to execute"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hooks_see_execution_env() {
        let dir = std::env::temp_dir().join(format!("conduit-hook-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("env.txt");
        let cmd = format!(
            "printf '%s %s %s' \"$CONDUIT_FLOW_ID\" \"$CONDUIT_STATUS\" \"$CONDUIT_ERROR\" > {}",
            out.display()
        );
        run_hooks(
            &[cmd, "exit 3".to_string()],
            &HookEnv {
                flow_id: "lead-intake",
                execution_id: "e1",
                status: "failed",
                error: Some("boom"),
            },
        )
        .await;
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "lead-intake failed boom");
        std::fs::remove_dir_all(&dir).ok();
    }
}
