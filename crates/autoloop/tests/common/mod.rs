//! Common test utilities for autoloop integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Credential variable used by test configs so real keys never leak in
pub const TEST_KEY_ENV: &str = "AUTOLOOP_TEST_API_KEY";

/// Isolated HOME and working directory
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub workspace_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let workspace_dir = temp_dir.path().join("workspace");
        std::fs::create_dir_all(&workspace_dir)?;

        Ok(Self {
            temp_dir,
            workspace_dir,
        })
    }

    pub fn workspace_file(&self, name: &str) -> PathBuf {
        self.workspace_dir.join(name)
    }

    pub fn config_file(&self) -> PathBuf {
        self.workspace_dir.join("autoloop.json")
    }

    /// Command running inside the workspace with HOME pointed at the temp dir
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_autoloop"));
        cmd.current_dir(&self.workspace_dir);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("USERPROFILE", self.temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd.env_remove(TEST_KEY_ENV);
        cmd
    }

    /// Write a config that reads its key from [`TEST_KEY_ENV`]
    pub fn create_config(&self) -> anyhow::Result<()> {
        let config = serde_json::json!({
            "workspace": { "root": self.workspace_dir },
            "model": { "api_key_env": TEST_KEY_ENV },
            "run": { "max_cycles": 2, "cooldown_ms": 0 }
        });
        std::fs::write(self.config_file(), serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
