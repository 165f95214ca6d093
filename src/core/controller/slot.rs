use std::fmt;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Turn,
    Compaction,
}

/// How a background operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Completed,
    Failed(CoreError),
    Cancelled,
}

impl OperationOutcome {
    /// Cancellation reported as an error is still a cancellation.
    pub fn from_error(error: CoreError) -> Self {
        if error.is_cancelled() {
            OperationOutcome::Cancelled
        } else {
            OperationOutcome::Failed(error)
        }
    }
}

/// Observable view of the operation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationStatus {
    #[default]
    Idle,
    Running,
    Compacting,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationStatus::Idle => "idle",
            OperationStatus::Running => "running",
            OperationStatus::Compacting => "compacting",
        })
    }
}

#[derive(Debug)]
pub struct OperationHandle {
    pub id: u64,
    pub cancel: CancellationToken,
    /// Taken by whoever joins the task.
    pub task: Option<JoinHandle<OperationOutcome>>,
}

/// The single background operation the controller may be running.
#[derive(Debug, Default)]
pub enum OperationSlot {
    #[default]
    Idle,
    Running(OperationHandle),
    Compacting(OperationHandle),
}

impl OperationSlot {
    pub fn new(kind: OperationKind, handle: OperationHandle) -> Self {
        match kind {
            OperationKind::Turn => OperationSlot::Running(handle),
            OperationKind::Compaction => OperationSlot::Compacting(handle),
        }
    }

    pub fn status(&self) -> OperationStatus {
        match self {
            OperationSlot::Idle => OperationStatus::Idle,
            OperationSlot::Running(_) => OperationStatus::Running,
            OperationSlot::Compacting(_) => OperationStatus::Compacting,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, OperationSlot::Idle)
    }

    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            OperationSlot::Idle => None,
            OperationSlot::Running(_) => Some(OperationKind::Turn),
            OperationSlot::Compacting(_) => Some(OperationKind::Compaction),
        }
    }

    pub fn handle_mut(&mut self) -> Option<&mut OperationHandle> {
        match self {
            OperationSlot::Idle => None,
            OperationSlot::Running(handle) | OperationSlot::Compacting(handle) => Some(handle),
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            OperationSlot::Idle => None,
            OperationSlot::Running(handle) | OperationSlot::Compacting(handle) => Some(handle.id),
        }
    }
}
