//! Once-only agent initialization under concurrency, plus bounded query
//! retry.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::agent::AgentHandle;
use crate::error::{Result, WeatherError};
use crate::payload::RawAgentResult;

/// Owns the single long-lived agent handle.
///
/// Initialization uses a double-checked flag behind one mutex: the flag is
/// only set after initialization actually succeeds, so a failed attempt
/// leaves the session eligible for retry. The lock covers initialization
/// only; queries after that run concurrently.
pub struct AgentSession<A: AgentHandle> {
    agent: A,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
    max_attempts: u32,
}

impl<A: AgentHandle> AgentSession<A> {
    pub fn new(agent: A, max_attempts: u32) -> Self {
        Self {
            agent,
            init_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            max_attempts,
        }
    }

    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.agent.initialize().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Runs one query with an attempt budget; an attempt budget of 0 or 1
    /// degrades to no-retry. Retries are immediate: the prompt is
    /// deterministic per request, so re-sending is safe, though a
    /// side-effecting tool would run twice. The Mongo tool is read-only.
    pub async fn run_query(&self, prompt: &str) -> Result<RawAgentResult> {
        self.ensure_initialized().await?;

        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.agent.run(prompt).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "agent query attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| WeatherError::Agent("agent failed without an error".into())))
    }
}
