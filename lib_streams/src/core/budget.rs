//! Execution budget of one generation.
//!
//! Measured on the tokio clock so paused-time tests advance it together with
//! the inter-cycle sleeps.

use std::time::Duration;

use tokio::time::Instant;

/// Wall-clock allowance of a generation, counted from its start.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBudget {
    started: Instant,
    limit: Duration,
}

impl ExecutionBudget {
    /// Starts the clock now.
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Time spent since the start.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the limit, zero once exceeded.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    /// Whether strictly more than `margin` is left.
    pub fn has_more_than(&self, margin: Duration) -> bool {
        self.remaining() > margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn remaining_shrinks_with_the_clock() {
        let budget = ExecutionBudget::start(Duration::from_secs(60));
        assert!(budget.has_more_than(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(55)).await;
        assert_eq!(budget.remaining(), Duration::from_secs(5));
        assert!(!budget.has_more_than(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(budget.remaining(), Duration::ZERO);
    }
}
