//! Bookkeeping for one in-flight cross-component call.

use crate::store::{ComponentAddr, TaskId};

use super::CanonOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    /// The core function returned; results are lifted and post-return runs.
    Returned,
}

/// Something that happened during a task, reported when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// The callee dropped a borrow handle created for this task.
    BorrowDropped { handle: u32 },
}

#[derive(Debug)]
pub struct Task {
    pub(crate) caller: ComponentAddr,
    pub(crate) callee: ComponentAddr,
    pub(crate) options: CanonOptions,
    /// Live borrow handles created in the callee for this task.
    pub(crate) borrow_count: u32,
    /// Caller handles lent out for this task.
    pub(crate) lenders: Vec<(ComponentAddr, u32)>,
    /// Borrow handles created in the callee, revoked if still live at exit.
    pub(crate) borrows: Vec<u32>,
    pub(crate) events: Vec<TaskEvent>,
    pub(crate) state: TaskState,
}

impl Task {
    pub(crate) fn new(caller: ComponentAddr, callee: ComponentAddr, options: CanonOptions) -> Self {
        Task {
            caller,
            callee,
            options,
            borrow_count: 0,
            lenders: Vec::new(),
            borrows: Vec::new(),
            events: Vec::new(),
            state: TaskState::Running,
        }
    }

    pub fn caller(&self) -> ComponentAddr {
        self.caller
    }

    pub fn callee(&self) -> ComponentAddr {
        self.callee
    }

    pub fn options(&self) -> &CanonOptions {
        &self.options
    }

    pub fn borrow_count(&self) -> u32 {
        self.borrow_count
    }

    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    pub fn state(&self) -> TaskState {
        self.state
    }
}

/// Result of completing a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub task: TaskId,
    pub events: Vec<TaskEvent>,
}
