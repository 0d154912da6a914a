use crate::utils::logger::DISTRIBUTION_TARGET;
use std::sync::Mutex;

/// Consumer of human-readable progress for a UI or report layer.
///
/// Implementations must be cheap; they are called inline on the
/// sequencing task between network round-trips.
pub trait ProgressSink: Send + Sync {
    /// Free-text progress line
    fn line(&self, message: &str);

    /// Status change for a single recipient wallet
    fn job_update(&self, wallet: &str, status: &str) {
        self.line(&format!("{} -> {}", wallet, status));
    }
}

/// Default sink: forwards everything to `tracing` under the distribution target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn line(&self, message: &str) {
        tracing::info!(target: DISTRIBUTION_TARGET, "{}", message);
    }

    fn job_update(&self, wallet: &str, status: &str) {
        tracing::info!(target: DISTRIBUTION_TARGET, "[{}] {}", wallet, status);
    }
}

/// Sink that keeps every line in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
    updates: Mutex<Vec<(String, String)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn line(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }

    fn job_update(&self, wallet: &str, status: &str) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push((wallet.to_string(), status.to_string()));
        }
    }
}
