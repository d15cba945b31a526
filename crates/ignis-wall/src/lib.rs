//! # Ignis-Wall
//!
//! Moving-wall boundary conditions for constant-volume reactor simulations.
//!
//! Real facilities are not perfectly constant-volume. A shock tube shows a
//! slow pressure rise behind the reflected shock, and a rapid compression
//! machine compresses the mixture before holding it. Both are emulated by
//! letting one wall of the simulated reactor move with a prescribed
//! velocity.
//!
//! ## Profiles
//!
//! 1. **Volume history**: a measured (or emulated) volume trace is
//!    normalized to unit initial volume and differentiated. With unit wall
//!    area the velocity is simply `dV/dt`.
//! 2. **Pressure rise**: a linear fractional rise `P(t) = P0 (A t + 1)` is
//!    sampled at 20 kHz, each pressure is reached isentropically from the
//!    initial state, and the resulting volume trace is differentiated.
//!
//! Outside the sampled time range the wall stands still.

use ignis_core::{IgnisError, Result, ThermoPhase, Time, TimeSeries, WallVelocity};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sampling frequency for pressure-rise emulation (Hz)
pub const PRESSURE_SAMPLING_HZ: f64 = 2.0e4;

// =============================================================================
// VOLUME HISTORY
// =============================================================================

/// Raw volume history as it appears in case files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeHistoryData {
    pub time: Vec<f64>,
    pub volume: Vec<f64>,
}

/// Volume-time history of a reactor.
///
/// Holds at least three samples with strictly increasing time and a
/// non-zero first volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "VolumeHistoryData")]
pub struct VolumeHistory {
    time: Vec<Time>,
    volume: Vec<f64>,
}

impl TryFrom<VolumeHistoryData> for VolumeHistory {
    type Error = IgnisError;

    fn try_from(data: VolumeHistoryData) -> Result<Self> {
        VolumeHistory::new(data.time, data.volume)
    }
}

impl VolumeHistory {
    pub fn new(time: Vec<Time>, volume: Vec<f64>) -> Result<Self> {
        if time.len() != volume.len() {
            return Err(IgnisError::LengthMismatch {
                expected: time.len(),
                got: volume.len(),
            });
        }
        if time.len() < 3 {
            return Err(IgnisError::InsufficientPoints {
                required: 3,
                got: time.len(),
            });
        }
        if time.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(IgnisError::NonMonotonic(
                "volume history time must be strictly increasing".into(),
            ));
        }
        if volume[0] == 0.0 || !volume[0].is_finite() {
            return Err(IgnisError::InvalidInput(format!(
                "initial volume must be finite and non-zero, got {}",
                volume[0]
            )));
        }
        Ok(Self { time, volume })
    }

    pub fn time(&self) -> &[Time] {
        &self.time
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Copy scaled so the first volume is exactly one
    pub fn normalized(&self) -> VolumeHistory {
        let v0 = self.volume[0];
        let mut volume: Vec<f64> = self.volume.iter().map(|v| v / v0).collect();
        volume[0] = 1.0;
        VolumeHistory {
            time: self.time.clone(),
            volume,
        }
    }

    /// Smallest gap between consecutive sample times
    pub fn min_time_step(&self) -> Time {
        self.time
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(f64::INFINITY, f64::min)
    }
}

// =============================================================================
// PRESSURE RISE EMULATION
// =============================================================================

/// Sample a linear pressure rise `P(t) = p0 (rate t + 1)` at `freq` Hz.
///
/// Samples run from zero through the first sample at or past `end_time`;
/// at least three are always produced.
pub fn sample_rising_pressure(end_time: Time, p0: f64, freq: f64, rate: f64) -> Result<TimeSeries> {
    if !(end_time > 0.0) || !end_time.is_finite() {
        return Err(IgnisError::InvalidInput(format!("end time must be positive, got {end_time}")));
    }
    if !(freq > 0.0) || !freq.is_finite() {
        return Err(IgnisError::InvalidInput(format!("sampling frequency must be positive, got {freq}")));
    }

    let n = ((end_time * freq).ceil() as usize + 1).max(3);
    let time: Vec<Time> = (0..n).map(|i| i as f64 / freq).collect();
    let values = time.iter().map(|&t| p0 * (rate * t + 1.0)).collect();
    TimeSeries::from_parts(time, values)
}

/// Volume history of an isentropic compression following a linear
/// pressure rise.
///
/// `initial` must already hold the initial temperature, pressure and
/// composition; it is cloned, never modified. Each volume is
/// `rho0 / rho(s0, P(t))`.
pub fn create_volume_history<P>(initial: &P, rate: f64, end_time: Time, freq: f64) -> Result<VolumeHistory>
where
    P: ThermoPhase + Clone,
{
    let mut gas = initial.clone();
    let entropy = gas.entropy_mass();
    let initial_density = gas.density();
    if !(initial_density > 0.0) {
        return Err(IgnisError::ThermoError(format!(
            "initial density must be positive, got {initial_density}"
        )));
    }

    let pressures = sample_rising_pressure(end_time, gas.pressure(), freq, rate)?;

    let mut volumes = Vec::with_capacity(pressures.len());
    for &p in pressures.values() {
        gas.set_sp(entropy, p)?;
        let density = gas.density();
        if !(density > 0.0) {
            return Err(IgnisError::ThermoError(format!(
                "non-positive density {density} at pressure {p} Pa"
            )));
        }
        volumes.push(initial_density / density);
    }

    VolumeHistory::new(pressures.time().to_vec(), volumes)
}

// =============================================================================
// VELOCITY PROFILE
// =============================================================================

/// How a velocity profile was obtained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProfileSource {
    /// Differentiated from a supplied volume history
    FromHistory,
    /// Differentiated from an isentropic pressure-rise emulation
    FromPressureRise { rate: f64 },
}

/// Wall velocity versus time, interpolated linearly and zero outside the
/// sampled range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityProfile {
    source: ProfileSource,
    velocity: TimeSeries,
}

impl VelocityProfile {
    pub fn from_volume_history(history: &VolumeHistory) -> Result<Self> {
        Self::differentiate(history, ProfileSource::FromHistory)
    }

    pub fn from_pressure_rise<P>(initial: &P, rate: f64, end_time: Time, freq: f64) -> Result<Self>
    where
        P: ThermoPhase + Clone,
    {
        let history = create_volume_history(initial, rate, end_time, freq)?;
        debug!(samples = history.len(), rate, end_time, "synthesized pressure-rise volume history");
        Self::differentiate(&history, ProfileSource::FromPressureRise { rate })
    }

    fn differentiate(history: &VolumeHistory, source: ProfileSource) -> Result<Self> {
        let normalized = history.normalized();
        let volume = TimeSeries::from_parts(normalized.time, normalized.volume)?;
        Ok(Self {
            source,
            velocity: volume.derivative()?,
        })
    }

    /// Velocity at `t`; exactly zero strictly before the first sample or
    /// after the last
    pub fn evaluate(&self, t: Time) -> f64 {
        self.velocity.sample(t, 0.0)
    }

    pub fn source(&self) -> ProfileSource {
        self.source
    }

    pub fn times(&self) -> &[Time] {
        self.velocity.time()
    }

    pub fn velocities(&self) -> &[f64] {
        self.velocity.values()
    }

    pub fn len(&self) -> usize {
        self.velocity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty()
    }

    /// First and last sampled time
    pub fn time_range(&self) -> (Time, Time) {
        let times = self.times();
        (times[0], times[times.len() - 1])
    }
}

impl WallVelocity for VelocityProfile {
    fn velocity(&self, t: Time) -> f64 {
        self.evaluate(t)
    }
}

// =============================================================================
// WALL
// =============================================================================

/// Reactor wall: fixed for an ideal constant-volume experiment, moving when
/// a facility effect is emulated
#[derive(Debug, Clone)]
pub enum Wall {
    Stationary,
    Moving(VelocityProfile),
}

impl Wall {
    pub fn kind(&self) -> &'static str {
        match self {
            Wall::Stationary => "stationary",
            Wall::Moving(profile) => match profile.source() {
                ProfileSource::FromHistory => "volume history",
                ProfileSource::FromPressureRise { .. } => "pressure rise",
            },
        }
    }

    pub fn boxed(self) -> Box<dyn WallVelocity> {
        Box::new(self)
    }
}

impl WallVelocity for Wall {
    fn velocity(&self, t: Time) -> f64 {
        match self {
            Wall::Stationary => 0.0,
            Wall::Moving(profile) => profile.evaluate(t),
        }
    }
}
