//! Service lifecycle state.

/// Operational state of an [`ExchangeService`](crate::ExchangeService).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Built, rates not yet seeded, fluctuation not running.
    Starting,
    /// Seeded and fluctuating.
    Running,
    /// Stopping the fluctuation task.
    ShuttingDown,
    /// Fluctuation task has exited.
    Stopped,
}

impl ServiceState {
    /// Check if the background fluctuation is live.
    pub fn is_operational(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}
