//! Per-run resource governor.
//!
//! Owns the wall-clock deadline, the loop and callback iteration counters,
//! the tool-call counter and the call-depth counter for one run. The
//! interpreter consults it at every loop iteration, every closure call and
//! every tool dispatch, so a CPU-bound script is stopped cooperatively
//! without relying on the async timer ever getting a chance to fire.

use std::time::{Duration, Instant};

use crate::error::Budget;

/// Stand-in deadline for timeouts too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Limits enforced by a [`Governor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget for the whole run.
    pub timeout: Duration,
    /// Maximum tool calls per run.
    pub max_tool_calls: usize,
    /// Maximum iterations of any single loop.
    pub max_loop_iterations: u64,
    /// Maximum loop iterations plus closure invocations per run.
    pub max_total_iterations: u64,
    /// Maximum closure call depth.
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_tool_calls: 100,
            max_loop_iterations: 10_000,
            max_total_iterations: 100_000,
            max_call_depth: 64,
        }
    }
}

/// Tracks budget consumption for one run.
#[derive(Debug)]
pub struct Governor {
    limits: Limits,
    started: Instant,
    deadline: Instant,
    tool_calls: usize,
    total_iterations: u64,
    call_depth: usize,
}

impl Governor {
    /// Start the clock.
    pub fn new(limits: Limits) -> Self {
        let started = Instant::now();
        Self {
            limits,
            started,
            deadline: started
                .checked_add(limits.timeout)
                .unwrap_or_else(|| started + FAR_FUTURE),
            tool_calls: 0,
            total_iterations: 0,
            call_depth: 0,
        }
    }

    /// The limits this governor enforces.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Fail if the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), Budget> {
        if Instant::now() >= self.deadline {
            return Err(self.wall_clock());
        }
        Ok(())
    }

    /// The wall-clock budget, as reported when it runs out.
    pub fn wall_clock(&self) -> Budget {
        Budget::WallClock {
            timeout_ms: self.limits.timeout.as_millis() as u64,
        }
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record one loop iteration; `iteration` is the 1-based count within
    /// the current loop.
    pub fn tick_loop(&mut self, iteration: u64) -> Result<(), Budget> {
        if iteration > self.limits.max_loop_iterations {
            return Err(Budget::LoopIterations {
                max: self.limits.max_loop_iterations,
            });
        }
        self.tick()
    }

    /// Record one closure invocation.
    pub fn tick_callback(&mut self) -> Result<(), Budget> {
        self.tick()
    }

    fn tick(&mut self) -> Result<(), Budget> {
        self.total_iterations += 1;
        if self.total_iterations > self.limits.max_total_iterations {
            return Err(Budget::TotalIterations {
                max: self.limits.max_total_iterations,
            });
        }
        self.check_deadline()
    }

    /// Reserve one tool call. Returns the 1-based call number.
    pub fn reserve_tool_call(&mut self) -> Result<usize, Budget> {
        if self.tool_calls >= self.limits.max_tool_calls {
            return Err(Budget::ToolCalls {
                max: self.limits.max_tool_calls,
            });
        }
        self.tool_calls += 1;
        Ok(self.tool_calls)
    }

    /// Tool calls made so far.
    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    /// Enter a closure call. Returns false when the depth limit is reached.
    pub fn enter_call(&mut self) -> bool {
        if self.call_depth >= self.limits.max_call_depth {
            return false;
        }
        self.call_depth += 1;
        true
    }

    /// Leave a closure call.
    pub fn exit_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }
}
