//! Step-by-step integration to an exact end time.
//!
//! The external integrator chooses its own step sizes. Every native step is
//! recorded; the step that crosses the end time is replaced by a linear
//! interpolation so the final record sits exactly on the end time.

use ignis_core::{IgnisError, ReactorNet, ReactorState, Result, Time, Trajectory};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Receives every recorded reactor state, in time order
pub trait StepSink {
    fn record(&mut self, state: &ReactorState) -> Result<()>;
}

impl StepSink for Trajectory {
    fn record(&mut self, state: &ReactorState) -> Result<()> {
        self.push(state.clone());
        Ok(())
    }
}

impl StepSink for Vec<ReactorState> {
    fn record(&mut self, state: &ReactorState) -> Result<()> {
        self.push(state.clone());
        Ok(())
    }
}

/// Shared abort flag, checked between integrator steps
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one integration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverReport {
    /// Native steps taken
    pub steps: usize,
    /// Time of the last record
    pub final_time: Time,
    /// Whether the last record was interpolated
    pub interpolated: bool,
}

/// Advances a [`ReactorNet`] to a target time
#[derive(Debug, Clone)]
pub struct IntegrationDriver {
    max_steps: usize,
    max_wall_time: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl Default for IntegrationDriver {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_wall_time: None,
            cancel: None,
        }
    }
}

impl IntegrationDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_wall_time(mut self, limit: Duration) -> Self {
        self.max_wall_time = Some(limit);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn max_wall_time(&self) -> Option<Duration> {
        self.max_wall_time
    }

    /// Integrate from the reactor's current time to `end_time`.
    ///
    /// Records the initial state, each native step at or before `end_time`,
    /// and finally the state interpolated at `end_time` if the last step
    /// overshot it.
    pub fn integrate<R, S>(&self, reactor: &mut R, end_time: Time, sink: &mut S) -> Result<DriverReport>
    where
        R: ReactorNet + ?Sized,
        S: StepSink + ?Sized,
    {
        if !(end_time > 0.0) || !end_time.is_finite() {
            return Err(IgnisError::InvalidInput(format!(
                "end time must be positive and finite, got {end_time}"
            )));
        }

        let started = Instant::now();
        let mut previous = reactor.state();
        sink.record(&previous)?;
        let mut steps = 0usize;

        while previous.time < end_time {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(IgnisError::Cancelled(previous.time));
            }
            let out_of_time = self.max_wall_time.is_some_and(|limit| started.elapsed() > limit);
            if steps >= self.max_steps || out_of_time {
                return Err(IgnisError::NonTermination {
                    end_time,
                    steps,
                    time: previous.time,
                });
            }

            reactor.step()?;
            steps += 1;
            let current = reactor.state();
            if !(current.time > previous.time) {
                return Err(IgnisError::IntegratorStalled(previous.time));
            }
            trace!(step = steps, time = current.time, "integrator step");

            if current.time > end_time {
                sink.record(&previous.interpolate(&current, end_time))?;
                return Ok(DriverReport {
                    steps,
                    final_time: end_time,
                    interpolated: true,
                });
            }

            sink.record(&current)?;
            previous = current;
        }

        Ok(DriverReport {
            steps,
            final_time: previous.time,
            interpolated: false,
        })
    }
}
