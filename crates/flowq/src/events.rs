use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Severity attached to operator-facing event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Sink for human-readable operational events (swap failures, accounting
/// corrections). Reports must be cheap and non-blocking; the queue may call
/// them while holding its write lock.
pub trait EventReporter: Send + Sync {
    fn report_event(&self, severity: Severity, category: &str, message: &str);
}

/// How a connected component is scheduled by the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Runs on a timer regardless of queue activity.
    TimerDriven,
    /// Runs only when the engine is told work is available.
    EventDriven,
}

/// The scheduler half the queue consumes: a single, non-blocking wakeup
/// for a component. The queue only ever calls this after releasing its
/// write lock; a scheduler that re-enters the queue from this callback
/// will deadlock against a caller still holding the lock.
pub trait ProcessScheduler: Send + Sync {
    fn register_event(&self, component_id: &str);
}

/// The two components a queue is wired between, as the queue sees them:
/// identity plus scheduling strategy. The source is woken when the queue
/// stops being full; the destination is woken when records arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEndpoints {
    pub source_id: String,
    pub source_strategy: SchedulingStrategy,
    pub destination_id: String,
    pub destination_strategy: SchedulingStrategy,
}

impl ConnectionEndpoints {
    pub fn new(
        source_id: impl Into<String>,
        source_strategy: SchedulingStrategy,
        destination_id: impl Into<String>,
        destination_strategy: SchedulingStrategy,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_strategy,
            destination_id: destination_id.into(),
            destination_strategy,
        }
    }
}
