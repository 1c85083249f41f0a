use thiserror::Error;

/// Errors raised while collecting monitoring inputs.
///
/// These never escape [`crate::HealthReporter::generate_report`]; a failed
/// input only leaves its part of the report empty.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("memory statistics unavailable: {0}")]
    MemoryUnavailable(String),
}

impl MonitorError {
    pub fn memory_unavailable(message: impl Into<String>) -> Self {
        Self::MemoryUnavailable(message.into())
    }
}
