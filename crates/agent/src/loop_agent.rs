//! Agent loop - plan, execute, observe, repeat

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use autoloop_config::Config;
use autoloop_provider::Provider;

use crate::context::SystemContext;
use crate::observation::{trim_observation, INITIAL_OBSERVATION};
use crate::plan::{JsonSpanParser, Plan, PlanParser};
use crate::requester::PlanRequester;
use crate::safety::SafetyFilter;
use crate::shell::CommandRunner;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The model signalled `done`
    Completed,
    /// Cycle budget exhausted without `done`
    Failed,
    /// Cancelled from outside; a running command always finishes first
    Interrupted,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    /// Cycles started, including ones skipped for plan errors
    pub cycles: u32,
    pub observation: String,
    pub last_reason: Option<String>,
}

/// Result of a single cycle
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Cancelled while waiting on the model
    Cancelled,
    /// No model produced a plan; nothing was executed
    PlanUnavailable(String),
    /// The plan ran (possibly partially)
    Executed {
        plan: Plan,
        observation: String,
        interrupted: bool,
    },
}

/// Drives the cycle until done, budget exhaustion, or cancellation
pub struct AgentLoop<P: Provider, R: CommandRunner> {
    config: Arc<Config>,
    context: SystemContext,
    requester: PlanRequester<P>,
    parser: Box<dyn PlanParser>,
    safety: SafetyFilter,
    runner: R,
}

impl<P: Provider, R: CommandRunner> AgentLoop<P, R> {
    pub fn new(config: Arc<Config>, context: SystemContext, provider: Arc<P>, runner: R) -> Self {
        let requester = PlanRequester::new(provider, Arc::clone(&config));
        let safety = SafetyFilter::from_config(&config.safety);
        Self {
            config,
            context,
            requester,
            parser: Box::new(JsonSpanParser),
            safety,
            runner,
        }
    }

    /// Swap the plan parser
    pub fn with_parser(mut self, parser: impl PlanParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Run until a terminal state
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        let max_cycles = self.config.run.max_cycles;
        let mut observation = INITIAL_OBSERVATION.to_string();
        let mut last_reason = None;

        for cycle in 1..=max_cycles {
            if cancel.is_cancelled() {
                return self.interrupted(cycle - 1, observation, last_reason);
            }

            info!("=== CYCLE {}/{} ===", cycle, max_cycles);

            match self.run_cycle(&observation, cancel).await {
                CycleOutcome::Cancelled => {
                    return self.interrupted(cycle, observation, last_reason);
                }
                CycleOutcome::PlanUnavailable(reason) => {
                    warn!("[PLAN ERROR] cycle {}: {}", cycle, reason);
                }
                CycleOutcome::Executed {
                    plan,
                    observation: next,
                    interrupted,
                } => {
                    observation = next;
                    info!("--- Observation (tail) ---\n{}", observation);
                    last_reason = Some(plan.reason.clone());

                    if interrupted {
                        return self.interrupted(cycle, observation, last_reason);
                    }

                    if plan.is_done() {
                        info!("[COMPLETED] model declared the task done after cycle {}", cycle);
                        return RunReport {
                            status: RunStatus::Completed,
                            cycles: cycle,
                            observation,
                            last_reason,
                        };
                    }
                }
            }

            if cycle < max_cycles && !self.cool_down(cancel).await {
                return self.interrupted(cycle, observation, last_reason);
            }
        }

        error!(
            "[FAILED] acceptance criteria not met within {} cycles",
            max_cycles
        );
        RunReport {
            status: RunStatus::Failed,
            cycles: max_cycles,
            observation,
            last_reason,
        }
    }

    /// One plan → execute → observe pass
    pub async fn run_cycle(&self, observation: &str, cancel: &CancellationToken) -> CycleOutcome {
        let request = self.requester.request(self.context.prompt(), observation);
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CycleOutcome::Cancelled,
            result = request => match result {
                Ok(raw) => raw,
                Err(e) => return CycleOutcome::PlanUnavailable(e.to_string()),
            },
        };

        let plan = self.parser.parse(&raw);
        info!(
            "Reason: {}",
            if plan.reason.is_empty() {
                "(no reason)"
            } else {
                plan.reason.as_str()
            }
        );
        for criterion in &plan.success_criteria {
            debug!("Success criterion: {}", criterion);
        }

        let (logs, interrupted) = self.execute_plan(&plan, cancel).await;
        let observation = trim_observation(&logs, self.config.run.observation_max_chars);

        CycleOutcome::Executed {
            plan,
            observation,
            interrupted,
        }
    }

    /// Run the plan's commands in order. Returns the log entries and whether
    /// cancellation cut the plan short.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> (Vec<String>, bool) {
        let mut logs = Vec::new();

        for spec in &plan.commands {
            let command = spec.shell.trim();
            if command.is_empty() {
                continue;
            }

            if cancel.is_cancelled() {
                warn!("[INTERRUPTED] skipping remaining commands");
                return (logs, true);
            }

            if let Some(pattern) = self.safety.matched(command) {
                warn!("[SKIP BLOCKED] {} (matched {:?})", command, pattern);
                logs.push(format!("[SKIP BLOCKED] {}", command));
                continue;
            }

            info!("$ {}", command);
            let output = self.runner.execute(command).await;
            logs.push(output.log_entry(command));

            if !output.success() && !spec.allow_fail {
                warn!(
                    "[HALT] `{}` exited with {}; skipping the rest of this plan",
                    command, output.exit_code
                );
                break;
            }
        }

        (logs, false)
    }

    /// Sleep the cooldown. `false` if cancelled while waiting.
    async fn cool_down(&self, cancel: &CancellationToken) -> bool {
        let cooldown = self.config.run.cooldown();
        if cooldown.is_zero() {
            return !cancel.is_cancelled();
        }
        debug!("Cooling down for {:?}", cooldown);
        tokio::select! {
            _ = tokio::time::sleep(cooldown) => true,
            _ = cancel.cancelled() => false,
        }
    }

    fn interrupted(
        &self,
        cycles: u32,
        observation: String,
        last_reason: Option<String>,
    ) -> RunReport {
        warn!("[INTERRUPTED] stopping after {} cycle(s)", cycles);
        RunReport {
            status: RunStatus::Interrupted,
            cycles,
            observation,
            last_reason,
        }
    }
}
