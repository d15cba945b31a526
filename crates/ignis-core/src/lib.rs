//! # Ignis Core
//!
//! Shared types and utilities for ignition delay simulation.
//!
//! ## Experiments
//!
//! | Apparatus | Wall model | Ignition search |
//! |-----------|------------|-----------------|
//! | Shock tube | Fixed, or isentropic pressure rise | From t = 0 |
//! | Rapid compression machine | Fixed, or measured volume history | After compression |
//!
//! ## Design Philosophy
//!
//! 1. The chemistry is external: mechanisms, thermodynamics and the stiff
//!    integrator sit behind [`Mechanism`], [`ThermoPhase`] and [`ReactorNet`]
//! 2. Every state handed out is a value, never a view into the integrator
//! 3. Finite differences match the second-order scheme used for experiment
//!    post-processing

use ndarray::Array1;
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common errors
#[derive(Debug, Error)]
pub enum IgnisError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported composition type: {0}")]
    UnsupportedComposition(String),

    #[error("Unsupported ignition criterion: {0}")]
    UnsupportedCriterion(String),

    #[error("Species {0} not found in species key")]
    SpeciesKeyMissing(String),

    #[error("Insufficient points: need at least {required}, got {got}")]
    InsufficientPoints { required: usize, got: usize },

    #[error("Length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Non-monotonic data: {0}")]
    NonMonotonic(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Integration did not reach end time {end_time} s after {steps} steps (t = {time} s)")]
    NonTermination { end_time: f64, steps: usize, time: f64 },

    #[error("Integrator stalled at t = {0} s")]
    IntegratorStalled(f64),

    #[error("Integration cancelled at t = {0} s")]
    Cancelled(f64),

    #[error("Case not set up: {0}")]
    NotSetUp(String),

    #[error("Thermodynamic error: {0}")]
    ThermoError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Numerical error: {0}")]
    NumericalError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IgnisError>;

/// Time point (s)
pub type Time = f64;

/// Temperature (K)
pub type Temperature = f64;

/// Pressure (Pa)
pub type Pressure = f64;

// =============================================================================
// UNITS
// =============================================================================

/// Units attached to reported quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    // Time
    Second,
    Millisecond,
    Microsecond,

    // Temperature
    Kelvin,

    // Pressure
    Pascal,
    Atmosphere,
    Bar,

    // Rate
    PerSecond,
}

/// Physical dimension of a [`Unit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Time,
    Temperature,
    Pressure,
    Rate,
}

impl Unit {
    /// Convert to SI base units
    pub fn to_si_factor(&self) -> f64 {
        match self {
            Unit::Second => 1.0,
            Unit::Millisecond => 1e-3,
            Unit::Microsecond => 1e-6,
            Unit::Kelvin => 1.0,
            Unit::Pascal => 1.0,
            Unit::Atmosphere => 101_325.0,
            Unit::Bar => 1e5,
            Unit::PerSecond => 1.0,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Second | Unit::Millisecond | Unit::Microsecond => Dimension::Time,
            Unit::Kelvin => Dimension::Temperature,
            Unit::Pascal | Unit::Atmosphere | Unit::Bar => Dimension::Pressure,
            Unit::PerSecond => Dimension::Rate,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Second => "s",
            Unit::Millisecond => "ms",
            Unit::Microsecond => "us",
            Unit::Kelvin => "K",
            Unit::Pascal => "Pa",
            Unit::Atmosphere => "atm",
            Unit::Bar => "bar",
            Unit::PerSecond => "1/s",
        }
    }
}

/// Quantity with value and unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn seconds(value: f64) -> Self {
        Self::new(value, Unit::Second)
    }

    /// Convert to SI base units
    pub fn to_si(&self) -> f64 {
        self.value * self.unit.to_si_factor()
    }

    /// Express in another unit of the same dimension
    pub fn to(&self, unit: Unit) -> Option<Quantity> {
        if unit.dimension() != self.unit.dimension() {
            return None;
        }
        Some(Quantity::new(self.to_si() / unit.to_si_factor(), unit))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(p) => write!(f, "{:.*} {}", p, self.value, self.unit.symbol()),
            None => write!(f, "{} {}", self.value, self.unit.symbol()),
        }
    }
}

// =============================================================================
// FINITE DIFFERENCES
// =============================================================================

/// First derivative `dy/dx` using second-order finite differences.
///
/// Central differences in the interior and three-point one-sided differences
/// at both boundaries, weighted for non-uniform spacing. Exact for
/// polynomials up to degree two.
pub fn first_derivative<T: Float>(x: &[T], y: &[T]) -> Result<Vec<T>> {
    if x.len() != y.len() {
        return Err(IgnisError::LengthMismatch {
            expected: x.len(),
            got: y.len(),
        });
    }
    let n = x.len();
    if n < 3 {
        return Err(IgnisError::InsufficientPoints { required: 3, got: n });
    }
    if x.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(IgnisError::NonMonotonic(
            "independent variable must be strictly increasing".into(),
        ));
    }

    let two = T::one() + T::one();
    let mut dydx = Vec::with_capacity(n);

    // Forward one-sided at the left boundary
    let h1 = x[1] - x[0];
    let h2 = x[2] - x[1];
    let a = -(two * h1 + h2) / (h1 * (h1 + h2));
    let b = (h1 + h2) / (h1 * h2);
    let c = -h1 / (h2 * (h1 + h2));
    dydx.push(a * y[0] + b * y[1] + c * y[2]);

    for i in 1..n - 1 {
        let hs = x[i] - x[i - 1];
        let hd = x[i + 1] - x[i];
        let a = -hd / (hs * (hs + hd));
        let b = (hd - hs) / (hs * hd);
        let c = hs / (hd * (hs + hd));
        dydx.push(a * y[i - 1] + b * y[i] + c * y[i + 1]);
    }

    // Backward one-sided at the right boundary
    let h1 = x[n - 2] - x[n - 3];
    let h2 = x[n - 1] - x[n - 2];
    let a = h2 / (h1 * (h1 + h2));
    let b = -(h1 + h2) / (h1 * h2);
    let c = (two * h2 + h1) / (h2 * (h1 + h2));
    dydx.push(a * y[n - 3] + b * y[n - 2] + c * y[n - 1]);

    Ok(dydx)
}

/// Piecewise-linear interpolation of `ys(xs)` at `t`.
///
/// Returns `left` for `t < xs[0]` and `right` for `t > xs[last]`; the end
/// samples themselves are returned exactly. `xs` must be increasing.
pub fn interp(t: f64, xs: &[f64], ys: &[f64], left: f64, right: f64) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    if t.is_nan() {
        return f64::NAN;
    }
    let Some(last) = xs.len().checked_sub(1) else {
        return left;
    };
    if t < xs[0] {
        return left;
    }
    if t > xs[last] {
        return right;
    }
    if t == xs[last] {
        return ys[last];
    }

    // First sample strictly after t; always in 1..=last here
    let hi = xs.partition_point(|&x| x <= t);
    let lo = hi - 1;
    let frac = (t - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + frac * (ys[hi] - ys[lo])
}

// =============================================================================
// TIME SERIES
// =============================================================================

/// Samples of one variable at strictly increasing times.
///
/// Never edited in place; transformations return a new series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    time: Vec<Time>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Build from columns, checking lengths and strictly increasing time
    pub fn from_parts(time: Vec<Time>, values: Vec<f64>) -> Result<Self> {
        if time.len() != values.len() {
            return Err(IgnisError::LengthMismatch {
                expected: time.len(),
                got: values.len(),
            });
        }
        if time.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(IgnisError::NonMonotonic("series time must be strictly increasing".into()));
        }
        Ok(Self { time, values })
    }

    pub fn time(&self) -> &[Time] {
        &self.time
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Time derivative on the same sample times
    pub fn derivative(&self) -> Result<TimeSeries> {
        Ok(TimeSeries {
            time: self.time.clone(),
            values: first_derivative(&self.time, &self.values)?,
        })
    }

    /// Linear interpolation inside the sampled range, `outside` beyond it
    pub fn sample(&self, t: Time, outside: f64) -> f64 {
        interp(t, &self.time, &self.values, outside, outside)
    }
}

// =============================================================================
// REACTOR STATE AND TRAJECTORY
// =============================================================================

/// Snapshot of the reactor at one integration time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactorState {
    /// Integration time (s)
    pub time: Time,
    /// Temperature (K)
    pub temperature: Temperature,
    /// Pressure (Pa)
    pub pressure: Pressure,
    /// Volume (m^3)
    pub volume: f64,
    /// Species mass fractions, in mechanism order
    pub mass_fractions: Vec<f64>,
}

impl ReactorState {
    /// Linear blend between `self` and `next`, evaluated at `time`.
    pub fn interpolate(&self, next: &ReactorState, time: Time) -> ReactorState {
        let span = next.time - self.time;
        if span == 0.0 {
            return ReactorState {
                time,
                ..next.clone()
            };
        }
        let frac = (time - self.time) / span;
        let lerp = |a: f64, b: f64| a + frac * (b - a);

        ReactorState {
            time,
            temperature: lerp(self.temperature, next.temperature),
            pressure: lerp(self.pressure, next.pressure),
            volume: lerp(self.volume, next.volume),
            mass_fractions: self
                .mass_fractions
                .iter()
                .zip(&next.mass_fractions)
                .map(|(&a, &b)| lerp(a, b))
                .collect(),
        }
    }

    pub fn n_species(&self) -> usize {
        self.mass_fractions.len()
    }

    /// Whether every field, including each mass fraction, is finite
    pub fn is_finite(&self) -> bool {
        [self.time, self.temperature, self.pressure, self.volume]
            .iter()
            .chain(&self.mass_fractions)
            .all(|v| v.is_finite())
    }
}

/// Scalar columns of a trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateField {
    Time,
    Temperature,
    Pressure,
    Volume,
}

impl StateField {
    pub fn of(&self, state: &ReactorState) -> f64 {
        match self {
            StateField::Time => state.time,
            StateField::Temperature => state.temperature,
            StateField::Pressure => state.pressure,
            StateField::Volume => state.volume,
        }
    }
}

/// Append-only log of reactor states
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    states: Vec<ReactorState>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ReactorState) {
        self.states.push(state);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[ReactorState] {
        &self.states
    }

    pub fn first(&self) -> Option<&ReactorState> {
        self.states.first()
    }

    pub fn last(&self) -> Option<&ReactorState> {
        self.states.last()
    }

    /// Whole scalar column
    pub fn column(&self, field: StateField) -> Array1<f64> {
        self.states.iter().map(|s| field.of(s)).collect()
    }
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Boundary condition of the reactor: the rate of change of volume imposed
/// by a unit-area moving wall at time `t`.
pub trait WallVelocity: Send {
    fn velocity(&self, t: Time) -> f64;
}

impl<F> WallVelocity for F
where
    F: Fn(Time) -> f64 + Send,
{
    fn velocity(&self, t: Time) -> f64 {
        self(t)
    }
}

/// Thermodynamic state of a gas mixture, owned by the mechanism backend
pub trait ThermoPhase {
    fn n_species(&self) -> usize;

    fn species_names(&self) -> Vec<String>;

    /// Index of a species, exactly as named in the mechanism
    fn species_index(&self, name: &str) -> Option<usize>;

    /// Set temperature, pressure and mole fractions
    fn set_tpx(&mut self, temperature: Temperature, pressure: Pressure, x: &[(String, f64)]) -> Result<()>;

    /// Set temperature, pressure and mass fractions
    fn set_tpy(&mut self, temperature: Temperature, pressure: Pressure, y: &[(String, f64)]) -> Result<()>;

    /// Set mass entropy and pressure, holding composition fixed
    fn set_sp(&mut self, entropy_mass: f64, pressure: Pressure) -> Result<()>;

    fn temperature(&self) -> Temperature;

    fn pressure(&self) -> Pressure;

    /// Density (kg/m^3)
    fn density(&self) -> f64;

    /// Mass entropy (J/kg/K)
    fn entropy_mass(&self) -> f64;
}

/// Adaptive reactor network integrator
pub trait ReactorNet {
    /// Current internal time (s)
    fn time(&self) -> Time;

    /// Take one native adaptive step, returning the new time
    fn step(&mut self) -> Result<Time>;

    /// Snapshot at the current internal time
    fn state(&self) -> ReactorState;

    /// Upper bound on the native step size
    fn set_max_time_step(&mut self, max_dt: Time);
}

/// Kinetic mechanism backend
pub trait Mechanism: Sync {
    type Phase: ThermoPhase + Clone;
    type Net: ReactorNet + Send;

    fn name(&self) -> &str;

    /// Fresh gas phase for this mechanism
    fn new_phase(&self) -> Result<Self::Phase>;

    /// Ideal-gas reactor initialized from `phase`, bounded by a moving wall
    /// separating it from an inert environment
    fn build_reactor(&self, phase: &Self::Phase, wall: Box<dyn WallVelocity>) -> Result<Self::Net>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_derivative_quadratic_uniform() {
        let x: Vec<f64> = (0..6).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&x| 3.0 * x * x - 2.0 * x + 1.0).collect();
        let d = first_derivative(&x, &y).unwrap();
        for (xi, di) in x.iter().zip(&d) {
            assert_relative_eq!(*di, 6.0 * xi - 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_derivative_three_points_irregular() {
        let x = [0.0, 0.1, 0.4];
        let y: Vec<f64> = x.iter().map(|&x| x * x).collect();
        let d = first_derivative(&x, &y).unwrap();
        assert_relative_eq!(d[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(d[1], 0.2, epsilon = 1e-12);
        assert_relative_eq!(d[2], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_derivative_errors() {
        assert!(matches!(
            first_derivative(&[0.0, 1.0], &[1.0, 2.0]),
            Err(IgnisError::InsufficientPoints { required: 3, got: 2 })
        ));
        assert!(matches!(
            first_derivative(&[0.0, 1.0, 2.0], &[1.0, 2.0]),
            Err(IgnisError::LengthMismatch { .. })
        ));
        assert!(matches!(
            first_derivative(&[0.0, 1.0, 1.0], &[1.0, 2.0, 3.0]),
            Err(IgnisError::NonMonotonic(_))
        ));
    }

    #[test]
    fn test_interp_clamps_to_given_values() {
        let xs = [1.0, 2.0, 4.0];
        let ys = [10.0, 20.0, 0.0];
        assert_eq!(interp(0.5, &xs, &ys, 0.0, 0.0), 0.0);
        assert_eq!(interp(4.5, &xs, &ys, 0.0, -1.0), -1.0);
        assert_eq!(interp(1.0, &xs, &ys, 0.0, 0.0), 10.0);
        assert_eq!(interp(4.0, &xs, &ys, 0.0, 0.0), 0.0);
        assert_relative_eq!(interp(1.5, &xs, &ys, 0.0, 0.0), 15.0);
        assert_relative_eq!(interp(3.0, &xs, &ys, 0.0, 0.0), 10.0);
    }

    #[test]
    fn test_time_series() {
        assert!(TimeSeries::from_parts(vec![0.0, 0.0], vec![1.0, 1.0]).is_err());
        assert!(matches!(
            TimeSeries::from_parts(vec![0.0, 1.0], vec![1.0]),
            Err(IgnisError::LengthMismatch { expected: 2, got: 1 })
        ));

        let ts = TimeSeries::from_parts(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 4.0]).unwrap();
        let d = ts.derivative().unwrap();
        assert_eq!(d.time(), ts.time());
        assert_relative_eq!(d.values()[1], 2.0);
        assert_relative_eq!(ts.sample(1.5, 0.0), 2.5);
        assert_eq!(ts.sample(2.5, -1.0), -1.0);
    }

    #[test]
    fn test_state_interpolation() {
        let a = ReactorState {
            time: 1.0,
            temperature: 1000.0,
            pressure: 1e5,
            volume: 1.0,
            mass_fractions: vec![0.2, 0.8],
        };
        let b = ReactorState {
            time: 3.0,
            temperature: 1200.0,
            pressure: 3e5,
            volume: 0.5,
            mass_fractions: vec![0.0, 1.0],
        };
        let mid = a.interpolate(&b, 1.5);
        assert_eq!(mid.time, 1.5);
        assert_relative_eq!(mid.temperature, 1050.0);
        assert_relative_eq!(mid.pressure, 1.5e5);
        assert_relative_eq!(mid.volume, 0.875);
        assert_relative_eq!(mid.mass_fractions[0], 0.15);
        assert_relative_eq!(mid.mass_fractions[1], 0.85);
    }

    #[test]
    fn test_trajectory_columns() {
        let mut traj = Trajectory::new();
        for i in 0..3 {
            traj.push(ReactorState {
                time: i as f64,
                temperature: 300.0 + i as f64,
                pressure: 1e5,
                volume: 1.0,
                mass_fractions: vec![0.1 * i as f64, 1.0],
            });
        }
        assert_eq!(traj.column(StateField::Temperature).to_vec(), vec![300.0, 301.0, 302.0]);
        assert_eq!(traj.column(StateField::Time).to_vec(), vec![0.0, 1.0, 2.0]);
        assert!(traj.states().iter().all(ReactorState::is_finite));

        let mut bad = traj.states()[1].clone();
        bad.mass_fractions[0] = f64::NAN;
        assert!(!bad.is_finite());
        bad.mass_fractions[0] = 0.1;
        bad.pressure = f64::INFINITY;
        assert!(!bad.is_finite());
    }

    #[test]
    fn test_quantity_conversion() {
        let q = Quantity::seconds(2.5e-3);
        let ms = q.to(Unit::Millisecond).unwrap();
        assert_relative_eq!(ms.value, 2.5, epsilon = 1e-12);
        assert!(q.to(Unit::Kelvin).is_none());
        assert_eq!(format!("{:.1}", ms), "2.5 ms");
        assert_relative_eq!(Quantity::new(1.0, Unit::Atmosphere).to_si(), 101_325.0);
    }

    fn sorted_abscissae() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(0.01f64..1.0, 2..40).prop_map(|steps| {
            let mut x = vec![0.0];
            for h in steps {
                let last = *x.last().unwrap();
                x.push(last + h);
            }
            x
        })
    }

    proptest! {
        #[test]
        fn prop_derivative_exact_for_quadratics(
            x in sorted_abscissae(),
            a in -5.0f64..5.0,
            b in -5.0f64..5.0,
            c in -5.0f64..5.0,
        ) {
            let y: Vec<f64> = x.iter().map(|&x| a * x * x + b * x + c).collect();
            let d = first_derivative(&x, &y).unwrap();
            for (xi, di) in x.iter().zip(&d) {
                let exact = 2.0 * a * xi + b;
                prop_assert!((di - exact).abs() <= 1e-6 * (1.0 + exact.abs()));
            }
        }

        #[test]
        fn prop_interp_zero_outside(
            x in sorted_abscissae(),
            before in 0.001f64..10.0,
            after in 0.001f64..10.0,
        ) {
            let y: Vec<f64> = x.iter().map(|&x| x + 1.0).collect();
            let last = *x.last().unwrap();
            prop_assert_eq!(interp(x[0] - before, &x, &y, 0.0, 0.0), 0.0);
            prop_assert_eq!(interp(last + after, &x, &y, 0.0, 0.0), 0.0);
        }
    }
}
