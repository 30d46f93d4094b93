//! Plan requests with model fallback and retry/backoff

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use autoloop_config::{Config, RetryConfig};
use autoloop_provider::{ChatParams, Provider, ProviderError};

/// Every candidate model failed for this cycle
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("NO MODEL CANDIDATES CONFIGURED")]
    NoCandidates,

    #[error("ALL {attempted} MODEL CANDIDATES FAILED; LAST ERROR FROM {model}: {source}")]
    Exhausted {
        attempted: usize,
        model: String,
        #[source]
        source: ProviderError,
    },
}

/// Exponential delay sequence: base, 2×base, 4×base, … capped at max
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            next: base.min(max),
            max,
        }
    }

    pub fn from_config(retry: &RetryConfig) -> Self {
        Self::new(retry.base_delay(), retry.max_delay())
    }

    /// Current delay, advancing the sequence
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        current
    }
}

/// Uniform random jitter in `[0, max]`
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Asks the model for the next plan, trying candidates cheapest first
pub struct PlanRequester<P: Provider> {
    provider: Arc<P>,
    config: Arc<Config>,
}

impl<P: Provider> PlanRequester<P> {
    pub fn new(provider: Arc<P>, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    /// User turn carrying the latest observation
    pub fn user_message(observation: &str) -> String {
        format!(
            "Latest observation (tail-trimmed):\n{}\n\nReply with the JSON plan only.",
            observation
        )
    }

    /// Raw model text for the next plan. Does not parse.
    pub async fn request(
        &self,
        system: &str,
        observation: &str,
    ) -> std::result::Result<String, RequestError> {
        let candidates = &self.config.model.candidates;
        let user = Self::user_message(observation);
        let mut last: Option<(String, ProviderError)> = None;

        for model in candidates {
            let mut params = ChatParams::single_turn(model.as_str(), system, user.as_str());
            params.max_tokens = self.config.model.max_tokens;
            params.temperature = self.config.model.temperature;

            match self.try_model(params).await {
                Ok(text) => {
                    debug!("◆ PLAN RECEIVED FROM {} ({} CHARS)", model, text.len());
                    return Ok(text);
                }
                Err(e) => {
                    warn!("◆ MODEL {} EXHAUSTED RETRIES: {}", model, e);
                    last = Some((model.clone(), e));
                }
            }
        }

        match last {
            Some((model, source)) => Err(RequestError::Exhausted {
                attempted: candidates.len(),
                model,
                source,
            }),
            None => Err(RequestError::NoCandidates),
        }
    }

    /// Up to `max_retries_per_model` attempts against one model
    async fn try_model(&self, params: ChatParams) -> std::result::Result<String, ProviderError> {
        let retry = &self.config.retry;
        let attempts = retry.max_retries_per_model.max(1);
        let mut backoff = Backoff::from_config(retry);

        let mut attempt = 1;
        loop {
            let err = match self.provider.chat(params.clone()).await {
                Ok(response) => return Ok(response.text_or_empty_object()),
                Err(e) => e,
            };

            if attempt >= attempts {
                return Err(err);
            }

            let pause = if err.is_rate_limited() {
                backoff.next_delay() + jitter(retry.jitter())
            } else {
                retry.transient_delay()
            };
            info!(
                "◆ {} ATTEMPT {}/{} FAILED ({}); RETRYING IN {:?}",
                params.model, attempt, attempts, err, pause
            );
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            attempt += 1;
        }
    }
}
