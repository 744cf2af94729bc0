//! Decides whether an ingestion cycle runs the statistical engine.

use std::time::{Duration, Instant};

use super::window::WindowBuffer;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Fewer rows than the window needs. Nothing was trimmed.
    InsufficientData { size: usize, required: usize },
    /// Window full but the previous attempt was too recent. The window was
    /// trimmed; the engine must not run.
    Throttled { evicted: usize, remaining: Duration },
    /// Window trimmed to size; run the engine now.
    Evaluate { evicted: usize },
}

impl GateDecision {
    pub fn should_evaluate(&self) -> bool {
        matches!(self, GateDecision::Evaluate { .. })
    }
}

/// Fullness check plus optional throttle.
///
/// The attempt time is recorded when the gate opens, so a failed
/// evaluation still starts a new throttle period.
#[derive(Debug, Clone)]
pub struct EvaluationGate {
    window_size: usize,
    period: Option<Duration>,
    last_attempt: Option<Instant>,
}

impl EvaluationGate {
    pub fn new(window_size: usize, period: Option<Duration>) -> Self {
        EvaluationGate {
            window_size,
            period,
            last_attempt: None,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Check the window and trim it when full.
    pub fn check(&mut self, window: &mut WindowBuffer, now: Instant) -> GateDecision {
        let size = window.size();
        if size < self.window_size {
            return GateDecision::InsufficientData {
                size,
                required: self.window_size,
            };
        }

        let evicted = window.trim(self.window_size);

        if let (Some(period), Some(last)) = (self.period, self.last_attempt) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < period {
                return GateDecision::Throttled {
                    evicted,
                    remaining: period - elapsed,
                };
            }
        }

        self.last_attempt = Some(now);
        GateDecision::Evaluate { evicted }
    }
}
