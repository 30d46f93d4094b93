//! Common test utilities for agent integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use autoloop_agent::{CommandOutput, CommandRunner, SystemContext};
use autoloop_config::{Config, RetryConfig};
use autoloop_provider::{ChatParams, ChatResponse, Provider, ProviderError};

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

/// Config with no sleeps anywhere
pub fn fast_config(max_cycles: u32) -> Config {
    let mut config = Config::default();
    config.run.max_cycles = max_cycles;
    config.run.cooldown_ms = 0;
    config.retry = RetryConfig::immediate(1);
    config.model.candidates = vec!["test-model".to_string()];
    config
}

pub fn test_context() -> SystemContext {
    SystemContext::new("Make the tests pass.", vec!["Cargo.toml".to_string()])
}

/// Plan JSON with every command strict
pub fn plan_json(reason: &str, commands: &[&str], next: &str) -> String {
    let commands: Vec<serde_json::Value> = commands
        .iter()
        .map(|c| serde_json::json!({ "shell": c, "allowFail": false }))
        .collect();
    serde_json::json!({
        "reason": reason,
        "commands": commands,
        "successCriteria": ["it works"],
        "next": next,
    })
    .to_string()
}

pub fn server_error() -> ProviderError {
    ProviderError::Api {
        status: 500,
        message: "internal error".to_string(),
    }
}

/// Fake runner that records commands and answers from a script.
/// Unscripted commands succeed with empty output.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    executed: Arc<Mutex<Vec<String>>>,
    script: Arc<HashMap<String, CommandOutput>>,
    cancel_after_first: Option<CancellationToken>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, command: &str, output: CommandOutput) -> Self {
        let mut script = (*self.script).clone();
        script.insert(command.to_string(), output);
        self.script = Arc::new(script);
        self
    }

    /// Cancel `token` as soon as the first command finishes
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_after_first = Some(token);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn execute(&self, command: &str) -> CommandOutput {
        self.executed.lock().unwrap().push(command.to_string());
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        self.script
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::new(0, "", ""))
    }
}
