use std::time::{Duration, Instant};

/// Iteration budget of one session, counted in planner calls.
pub struct LoopController {
    max_iterations: u32,
    iterations: u32,
    failure_count: u32,
    start_time: Instant,
}

impl LoopController {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iterations: 0,
            failure_count: 0,
            start_time: Instant::now(),
        }
    }

    /// Claim one iteration. Returns false once the budget is spent.
    pub fn begin_iteration(&mut self) -> bool {
        if self.iterations >= self.max_iterations {
            return false;
        }
        self.iterations += 1;
        true
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn failures(&self) -> u32 {
        self.failure_count
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_exactly_max_iterations() {
        let mut ctrl = LoopController::new(3);
        assert!(ctrl.begin_iteration());
        assert!(ctrl.begin_iteration());
        assert!(ctrl.begin_iteration());
        assert!(!ctrl.begin_iteration());
        assert_eq!(ctrl.iterations(), 3);
    }

    #[test]
    fn zero_budget_never_starts_an_iteration() {
        let mut ctrl = LoopController::new(0);
        assert!(!ctrl.begin_iteration());
        ctrl.record_failure();
        assert_eq!(ctrl.failures(), 1);
    }
}
