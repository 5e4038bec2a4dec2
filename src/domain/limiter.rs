//! Per-execution resource limits.
//!
//! The step budget is the primary bound: one step per loop iteration, per
//! user function call and per dispatched bar. Call depth is tracked around
//! every user function call.
//! The wall clock is only sampled every `CLOCK_INTERVAL` steps and once per
//! bar, so a zero duration trips deterministically on the first check.

use std::time::{Duration, Instant};

pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5);

const CLOCK_INTERVAL: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_iterations: u64,
    pub max_call_depth: usize,
    pub max_duration: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitExceeded {
    #[error("Limit exceeded: more than {0} iterations")]
    Iterations(u64),

    #[error("Limit exceeded: call depth above {0}")]
    CallDepth(usize),

    #[error("Limit exceeded: execution took longer than {0} ms")]
    Timeout(u128),
}

#[derive(Debug)]
pub struct Limiter {
    limits: Limits,
    steps: u64,
    depth: usize,
    started: Instant,
}

impl Limiter {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            steps: 0,
            depth: 0,
            started: Instant::now(),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Consume one step of the budget.
    pub fn step(&mut self) -> Result<(), LimitExceeded> {
        if self.steps % CLOCK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        self.steps += 1;
        if self.steps > self.limits.max_iterations {
            return Err(LimitExceeded::Iterations(self.limits.max_iterations));
        }
        Ok(())
    }

    pub fn check_deadline(&self) -> Result<(), LimitExceeded> {
        if self.started.elapsed() >= self.limits.max_duration {
            return Err(LimitExceeded::Timeout(self.limits.max_duration.as_millis()));
        }
        Ok(())
    }

    /// Enter a call frame. On error the depth is left unchanged and the
    /// caller must not call `exit_call`.
    pub fn enter_call(&mut self) -> Result<(), LimitExceeded> {
        if self.depth >= self.limits.max_call_depth {
            return Err(LimitExceeded::CallDepth(self.limits.max_call_depth));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn exit_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}
