//! autoloop command implementations

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use autoloop_agent::{AgentLoop, ContextBuilder, RunReport, RunStatus, ShellExecutor};
use autoloop_config::{self, Config, ProviderKind};
use autoloop_provider::{ChatParams, GeminiProvider, OpenRouterProvider, Provider};

/// Process exit code for a run that used its whole cycle budget
pub const EXIT_EXHAUSTED: i32 = 2;
/// Process exit code after Ctrl-C (128 + SIGINT)
pub const EXIT_INTERRUPTED: i32 = 130;

/// Command-line values that replace config fields for one run
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub instructions: Option<String>,
    pub workspace: Option<String>,
    pub max_cycles: Option<u32>,
}

impl RunOverrides {
    fn apply(self, config: &mut Config) {
        if let Some(path) = self.instructions {
            config.instructions.path = path;
        }
        if let Some(root) = self.workspace {
            config.workspace.root = root;
        }
        if let Some(max_cycles) = self.max_cycles {
            config.run.max_cycles = max_cycles;
        }
    }
}

/// Load from an explicit path (which must exist) or the standard locations
async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => Config::load_required(path)
            .await
            .with_context(|| format!("Cannot load config {}", path.display())),
        None => Config::load().await.context("Cannot load config"),
    }
}

/// Run the loop. Returns the process exit code.
pub async fn run_command(config_path: Option<&Path>, overrides: RunOverrides) -> Result<i32> {
    let mut config = load_config(config_path).await?;
    overrides.apply(&mut config);
    config.validate()?;

    let api_key = config.api_key()?;
    let context = ContextBuilder::from_config(&config).await?;

    println!("◆ autoloop");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Workspace:    {}", config.workspace_root().display());
    println!("Instructions: {}", config.instructions_path().display());
    println!("Models:       {}", config.model.candidates.join(" → "));
    println!("Max cycles:   {}", config.run.max_cycles);

    let config = Arc::new(config);
    let report = match config.model.provider {
        ProviderKind::Gemini => {
            let provider = GeminiProvider::new(
                api_key,
                config.model.api_base.clone(),
                config.model.candidates.first().cloned(),
            );
            drive(config, context, provider).await?
        }
        ProviderKind::OpenAi => {
            let provider = OpenRouterProvider::new(
                api_key,
                config.model.api_base.clone(),
                config.model.candidates.first().cloned(),
            );
            drive(config, context, provider).await?
        }
    };

    print_report(&report);
    Ok(exit_code(report.status))
}

/// Wire a provider into the loop and run it under Ctrl-C cancellation
async fn drive<P: Provider + 'static>(
    config: Arc<Config>,
    context: autoloop_agent::SystemContext,
    provider: P,
) -> Result<RunReport> {
    anyhow::ensure!(
        provider.is_configured(),
        "Provider is not configured; set {}",
        config.model.api_key_env
    );
    info!("◆ Default model: {}", provider.default_model());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[INTERRUPTED] Ctrl-C received; stopping after the current command (press again to abort)");
            on_signal.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[INTERRUPTED] aborting");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });

    let runner = ShellExecutor::from_config(&config);
    let agent = AgentLoop::new(config, context, Arc::new(provider), runner);
    Ok(agent.run(&cancel).await)
}

fn print_report(report: &RunReport) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match report.status {
        RunStatus::Completed => println!("◆ COMPLETED after {} cycle(s)", report.cycles),
        RunStatus::Failed => println!(
            "◆ FAILED: acceptance criteria not met within {} cycles",
            report.cycles
        ),
        RunStatus::Interrupted => println!("◆ INTERRUPTED after {} cycle(s)", report.cycles),
    }
    if let Some(reason) = &report.last_reason {
        println!("Last reason: {}", reason);
    }
}

/// Map the final status to a process exit code
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::Failed => EXIT_EXHAUSTED,
        RunStatus::Interrupted => EXIT_INTERRUPTED,
    }
}

/// Write a default config and an instructions template
pub async fn init_command(config_path: Option<&Path>, force: bool) -> Result<()> {
    println!("◆ Initializing autoloop...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(autoloop_config::local_config_path);
    let config = autoloop_config::init(&path, force).await?;

    let instructions = config.instructions_path();
    if !instructions.exists() {
        if let Some(parent) = instructions.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&instructions, AGENTS_MD).await?;
        info!("◆ Created {}", instructions.display());
    }

    println!("\n◆ Config:       {}", path.display());
    println!("◆ Instructions: {}", instructions.display());
    println!("\nNext steps:");
    println!("  1. Describe the task in {}", instructions.display());
    println!("  2. export {}=<your key>", config.model.api_key_env);
    println!("  3. autoloop run");

    Ok(())
}

/// One-shot connectivity check
pub async fn ping_command(config_path: Option<&Path>, model: Option<String>) -> Result<()> {
    let config = load_config(config_path).await?;
    let api_key = config.api_key()?;
    println!("◆ Key:   ...{}", key_suffix(&api_key));

    let api_base = config.model.api_base.clone();
    let first = config.model.candidates.first().cloned();
    match config.model.provider {
        ProviderKind::Gemini => ping(GeminiProvider::new(api_key, api_base, first), model).await,
        ProviderKind::OpenAi => {
            ping(OpenRouterProvider::new(api_key, api_base, first), model).await
        }
    }
}

async fn ping<P: Provider>(provider: P, model: Option<String>) -> Result<()> {
    let model = model.unwrap_or_else(|| provider.default_model());
    println!("◆ Model: {}", model);

    let params = ChatParams::single_turn(
        model.as_str(),
        "You are a connectivity check.",
        "Reply with the single word: pong",
    );
    let reply = provider
        .chat(params)
        .await
        .with_context(|| format!("Model {} did not answer", model))?;

    println!("◆ Reply: {}", reply.content.as_deref().unwrap_or("").trim());
    Ok(())
}

/// Last four characters of a credential
fn key_suffix(key: &str) -> String {
    let count = key.chars().count();
    key.chars().skip(count.saturating_sub(4)).collect()
}

/// Show resolved configuration
pub async fn status_command(config_path: Option<&Path>) -> Result<()> {
    let resolved = autoloop_config::resolve_config_path(config_path);
    let config = load_config(config_path).await?;

    println!("◆ autoloop Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    match &resolved {
        Some(path) => println!("Config:       {} [OK]", path.display()),
        None => println!("Config:       [Defaults]"),
    }

    let workspace = config.workspace_root();
    println!(
        "Workspace:    {} {}",
        workspace.display(),
        if workspace.is_dir() { "[OK]" } else { "[Missing]" }
    );

    let instructions = config.instructions_path();
    let fallback = config.fallback_path();
    let instructions_state = if instructions.is_file() {
        "[OK]"
    } else if fallback.as_deref().is_some_and(Path::is_file) {
        "[Missing, fallback available]"
    } else {
        "[Missing]"
    };
    println!(
        "Instructions: {} {}",
        instructions.display(),
        instructions_state
    );

    println!("Provider:     {:?}", config.model.provider);
    println!("Models:       {}", config.model.candidates.join(" → "));
    println!(
        "API Key:      {} {}",
        config.model.api_key_env,
        if config.api_key().is_ok() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );
    println!("Max cycles:   {}", config.run.max_cycles);
    println!("Cooldown:     {:?}", config.run.cooldown());
    println!("Denylist:     {} patterns", config.safety.denylist.len());

    println!("\n◆ Ready");

    Ok(())
}

// Template content
const AGENTS_MD: &str = r#"# Task

Describe what the agent should accomplish in this workspace.

## Acceptance criteria

- List concrete, checkable conditions (for example: `cargo test` passes)

## Constraints

- Commands run through the host shell from the workspace root
- Prefer small, verifiable steps
"#;
