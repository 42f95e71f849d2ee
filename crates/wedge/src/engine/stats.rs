use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Trap;

/// Execution counters shared by every store of an engine.
#[derive(Debug, Default)]
pub struct Statistics {
    instructions: AtomicU64,
    host_calls: AtomicU64,
    cost_limit: Option<u64>,
}

impl Statistics {
    pub fn new(cost_limit: Option<u64>) -> Self {
        Statistics {
            instructions: AtomicU64::new(0),
            host_calls: AtomicU64::new(0),
            cost_limit,
        }
    }

    /// Account for `n` executed instructions, trapping once the total goes
    /// past the configured cost limit.
    pub fn add_instructions(&self, n: u64) -> Result<(), Trap> {
        let total = self.instructions.fetch_add(n, Ordering::Relaxed) + n;
        match self.cost_limit {
            Some(limit) if total > limit => Err(Trap::CostLimitExceeded),
            _ => Ok(()),
        }
    }

    pub(crate) fn add_host_call(&self) {
        self.host_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instruction_count(&self) -> u64 {
        self.instructions.load(Ordering::Relaxed)
    }

    pub fn host_call_count(&self) -> u64 {
        self.host_calls.load(Ordering::Relaxed)
    }

    pub fn cost_limit(&self) -> Option<u64> {
        self.cost_limit
    }

    pub fn reset(&self) {
        self.instructions.store(0, Ordering::Relaxed);
        self.host_calls.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_trips_after_budget() {
        let stats = Statistics::new(Some(5));
        assert!(stats.add_instructions(5).is_ok());
        assert!(matches!(
            stats.add_instructions(1),
            Err(Trap::CostLimitExceeded)
        ));
        stats.reset();
        assert_eq!(stats.instruction_count(), 0);
    }
}
