//! Bounded quote-post enrichment.

/// Default number of quote lookups allowed per fetched page.
pub const DEFAULT_QUOTE_BUDGET: usize = 6;

/// A per-page allowance of quote lookups.
///
/// Every attempted lookup spends one unit whether or not it succeeds. Once
/// the budget is spent the rest of the page is left unenriched.
#[derive(Debug, Clone)]
pub struct QuoteBudget {
    remaining: usize,
}

impl QuoteBudget {
    pub fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    /// Spend one unit. Returns false when nothing is left.
    pub fn try_spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

impl Default for QuoteBudget {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE_BUDGET)
    }
}
