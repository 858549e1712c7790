use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub retry_delay: f64,
    pub exponential_backoff: bool,
    pub backoff_multiplier: f64,
    pub max_retry_delay: f64,
    /// Per-attempt timeout in seconds; None leaves attempts unbounded.
    pub timeout: Option<f64>,
    pub cleanup_on_failure: bool,
    pub hardware_fallback_enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: 1.0,
            exponential_backoff: true,
            backoff_multiplier: 2.0,
            max_retry_delay: 60.0,
            timeout: None,
            cleanup_on_failure: true,
            hardware_fallback_enabled: true,
        }
    }
}

#[derive(Debug)]
pub struct RecoveryAttempt {
    pub attempt_number: u32,
    pub strategy: RecoveryStrategy,
    pub error: String,
    pub success: bool,
    pub duration: f64,
    pub fallback_method: Option<String>,
}

#[derive(Debug)]
pub struct RecoveryResult<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<Error>,
    pub attempts: Vec<RecoveryAttempt>,
    pub total_duration: f64,
    pub strategy_used: Option<RecoveryStrategy>,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    success: bool,
    strategy_used: Option<RecoveryStrategy>,
    attempts: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryStats {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub success_rate: f64,
    pub retry_success_count: usize,
    pub fallback_success_count: usize,
    pub total_attempts: usize,
    pub average_attempts: f64,
}

/// Retry with exponential backoff, then a one-shot fallback (typically the
/// same work re-encoded in software), then cleanup of partial output.
pub struct ErrorRecovery {
    config: RecoveryConfig,
    history: Mutex<Vec<HistoryEntry>>,
}

impl ErrorRecovery {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            history: Mutex::new(Vec::new()),
        }
    }

    pub async fn execute_with_recovery<T, Op, OpFut, Fb, FbFut, Cl, ClFut>(
        &self,
        operation_name: &str,
        mut operation: Op,
        fallback: Option<Fb>,
        cleanup: Option<Cl>,
    ) -> RecoveryResult<T>
    where
        Op: FnMut() -> OpFut,
        OpFut: Future<Output = Result<T>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T>>,
        Cl: FnOnce() -> ClFut,
        ClFut: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut attempts: Vec<RecoveryAttempt> = Vec::new();

        debug!("starting {operation_name} with recovery");

        for attempt in 1..=self.config.max_retries {
            let attempt_started = Instant::now();
            match self.run_with_timeout(operation()).await {
                Ok(value) => {
                    let strategy_used = (attempt > 1).then_some(RecoveryStrategy::Retry);
                    if attempt > 1 {
                        info!("{operation_name} succeeded on attempt {attempt}");
                    }
                    return self.finish(RecoveryResult {
                        success: true,
                        value: Some(value),
                        error: None,
                        attempts,
                        total_duration: started.elapsed().as_secs_f64(),
                        strategy_used,
                    });
                }
                Err(e) => {
                    let non_retryable = e.is_non_retryable();
                    attempts.push(RecoveryAttempt {
                        attempt_number: attempt,
                        strategy: RecoveryStrategy::Retry,
                        error: e.to_string(),
                        success: false,
                        duration: attempt_started.elapsed().as_secs_f64(),
                        fallback_method: None,
                    });
                    if non_retryable {
                        error!("{operation_name} failed with non-retryable error: {e}");
                        break;
                    }
                    warn!(
                        "{operation_name} failed on attempt {attempt}/{}: {e}",
                        self.config.max_retries
                    );
                }
            }

            if attempt < self.config.max_retries {
                let delay = self.retry_delay(attempt);
                debug!("waiting {delay:.2}s before retry");
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
        }

        if let Some(fallback) = fallback {
            if self.config.hardware_fallback_enabled {
                info!("attempting fallback for {operation_name}");
                let fallback_started = Instant::now();
                match self.run_with_timeout(fallback()).await {
                    Ok(value) => {
                        attempts.push(RecoveryAttempt {
                            attempt_number: attempts.len() as u32 + 1,
                            strategy: RecoveryStrategy::Fallback,
                            error: String::new(),
                            success: true,
                            duration: fallback_started.elapsed().as_secs_f64(),
                            fallback_method: Some("software encoding".to_string()),
                        });
                        info!("{operation_name} succeeded using fallback");
                        return self.finish(RecoveryResult {
                            success: true,
                            value: Some(value),
                            error: None,
                            attempts,
                            total_duration: started.elapsed().as_secs_f64(),
                            strategy_used: Some(RecoveryStrategy::Fallback),
                        });
                    }
                    Err(e) => {
                        error!("fallback for {operation_name} also failed: {e}");
                        attempts.push(RecoveryAttempt {
                            attempt_number: attempts.len() as u32 + 1,
                            strategy: RecoveryStrategy::Fallback,
                            error: e.to_string(),
                            success: false,
                            duration: fallback_started.elapsed().as_secs_f64(),
                            fallback_method: Some("software encoding".to_string()),
                        });
                    }
                }
            }
        }

        if self.config.cleanup_on_failure {
            if let Some(cleanup) = cleanup {
                debug!("cleaning up partial output for {operation_name}");
                cleanup().await;
            }
        }

        let final_error = attempts
            .last()
            .map(|a| a.error.clone())
            .unwrap_or_else(|| format!("{operation_name} failed"));
        error!("{operation_name} failed after all recovery attempts");

        self.finish(RecoveryResult {
            success: false,
            value: None,
            error: Some(Error::NonRetryable(final_error)),
            attempts,
            total_duration: started.elapsed().as_secs_f64(),
            strategy_used: None,
        })
    }

    async fn run_with_timeout<T, Fut>(&self, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match self.config.timeout {
            Some(seconds) => {
                match tokio::time::timeout(Duration::from_secs_f64(seconds), future).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout { seconds }),
                }
            }
            None => future.await,
        }
    }

    fn retry_delay(&self, attempt: u32) -> f64 {
        if !self.config.exponential_backoff {
            return self.config.retry_delay;
        }
        let delay = self.config.retry_delay
            * self
                .config
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        delay.min(self.config.max_retry_delay)
    }

    fn finish<T>(&self, result: RecoveryResult<T>) -> RecoveryResult<T> {
        self.history.lock().unwrap().push(HistoryEntry {
            success: result.success,
            strategy_used: result.strategy_used,
            attempts: result.attempts.len(),
        });
        result
    }

    pub fn stats(&self) -> RecoveryStats {
        let history = self.history.lock().unwrap();
        if history.is_empty() {
            return RecoveryStats::default();
        }

        let total = history.len();
        let successful = history.iter().filter(|h| h.success).count();
        let retry_success = history
            .iter()
            .filter(|h| h.success && h.strategy_used == Some(RecoveryStrategy::Retry))
            .count();
        let fallback_success = history
            .iter()
            .filter(|h| h.success && h.strategy_used == Some(RecoveryStrategy::Fallback))
            .count();
        let total_attempts: usize = history.iter().map(|h| h.attempts).sum();

        RecoveryStats {
            total_operations: total,
            successful_operations: successful,
            failed_operations: total - successful,
            success_rate: successful as f64 / total as f64 * 100.0,
            retry_success_count: retry_success,
            fallback_success_count: fallback_success,
            total_attempts,
            average_attempts: total_attempts as f64 / total as f64,
        }
    }

    pub fn reset_history(&self) {
        self.history.lock().unwrap().clear();
    }
}

/// Remove a partial output file or directory tree.
pub async fn cleanup_partial_output(path: &std::path::Path) {
    let outcome = if path.is_file() {
        tokio::fs::remove_file(path).await
    } else if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        Ok(())
    };
    if let Err(e) = outcome {
        error!("failed to clean up {}: {e}", path.display());
    }
}
