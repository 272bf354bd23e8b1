//! Iteration budget for plan execution.

/// Counts attempted steps against a fixed ceiling.
///
/// Charged once per attempted step, never per retry. Guards against plans
/// that slip past validation with pathological size or an undetected cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBudget {
    limit: u32,
    used: u32,
}

impl IterationBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Record one attempted step. Errors once the ceiling would be exceeded,
    /// without consuming the iteration.
    pub fn charge(&mut self) -> Result<u32, u32> {
        if self.used >= self.limit {
            return Err(self.limit);
        }
        self.used += 1;
        Ok(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}
