//! Common utilities for integration tests
//!
//! A perfect-gas mechanism with a toy integrator. The reactor takes fixed,
//! cycled step sizes, moves its volume with the wall (explicit Euler) and
//! reports the isentropic pressure unless a scripted pressure is supplied.

#![allow(dead_code)]

use ignis_core::{IgnisError, Mechanism, Quantity, ReactorNet, ReactorState, Result, ThermoPhase, Time, Unit, WallVelocity};
use ignis_sim::{Apparatus, CaseMeta, CaseProperties, ExperimentKind, IgnitionType, Simulation, SpeciesAmount, SpeciesKey};
use ignis_delay::IgnitionCriterion;
use std::sync::{Arc, Mutex};

pub const GAS_CONSTANT: f64 = 208.0;

/// Exactly representable step, keeps flat signals flat under differencing
pub const DYADIC_STEP: f64 = 1.0 / 65536.0;

/// Alternating steps whose running sums are inexact in binary, so flat
/// signals pick up round-off under differencing
pub const UNEVEN_STEPS: [f64; 2] = [1.0e-5, 1.7e-5];

pub type Signal = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

// =================================================================================================
// Phase
// =================================================================================================

/// Calorically perfect gas with pseudo-entropy `ln(p / rho^gamma)`
#[derive(Clone)]
pub struct MockPhase {
    species: Vec<String>,
    gamma: f64,
    temperature: f64,
    pressure: f64,
    mass_fractions: Vec<f64>,
    pub basis: Option<&'static str>,
}

impl MockPhase {
    fn set_composition(&mut self, t: f64, p: f64, amounts: &[(String, f64)]) -> Result<()> {
        let mut fractions = vec![0.0; self.species.len()];
        for (name, amount) in amounts {
            let index = self
                .species_index(name)
                .ok_or_else(|| IgnisError::ThermoError(format!("unknown species {name}")))?;
            fractions[index] += amount;
        }
        let total: f64 = fractions.iter().sum();
        if !(total > 0.0) {
            return Err(IgnisError::ThermoError("empty composition".into()));
        }
        self.mass_fractions = fractions.iter().map(|f| f / total).collect();
        self.temperature = t;
        self.pressure = p;
        Ok(())
    }

    pub fn mass_fractions(&self) -> &[f64] {
        &self.mass_fractions
    }
}

impl ThermoPhase for MockPhase {
    fn n_species(&self) -> usize {
        self.species.len()
    }

    fn species_names(&self) -> Vec<String> {
        self.species.clone()
    }

    fn species_index(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s == name)
    }

    fn set_tpx(&mut self, t: f64, p: f64, x: &[(String, f64)]) -> Result<()> {
        self.basis = Some("X");
        self.set_composition(t, p, x)
    }

    fn set_tpy(&mut self, t: f64, p: f64, y: &[(String, f64)]) -> Result<()> {
        self.basis = Some("Y");
        self.set_composition(t, p, y)
    }

    fn set_sp(&mut self, entropy_mass: f64, pressure: f64) -> Result<()> {
        let density = (pressure / entropy_mass.exp()).powf(1.0 / self.gamma);
        self.pressure = pressure;
        self.temperature = pressure / (GAS_CONSTANT * density);
        Ok(())
    }

    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn pressure(&self) -> f64 {
        self.pressure
    }

    fn density(&self) -> f64 {
        self.pressure / (GAS_CONSTANT * self.temperature)
    }

    fn entropy_mass(&self) -> f64 {
        (self.pressure / self.density().powf(self.gamma)).ln()
    }
}

// =================================================================================================
// Reactor
// =================================================================================================

pub struct MockReactor {
    time: Time,
    volume: f64,
    gamma: f64,
    t0: f64,
    p0: f64,
    mass_fractions: Vec<f64>,
    wall: Box<dyn WallVelocity>,
    steps: Vec<f64>,
    taken: usize,
    max_dt: Option<f64>,
    pressure_signal: Option<Signal>,
}

impl ReactorNet for MockReactor {
    fn time(&self) -> Time {
        self.time
    }

    fn step(&mut self) -> Result<Time> {
        let mut dt = self.steps[self.taken % self.steps.len()];
        if let Some(cap) = self.max_dt {
            dt = dt.min(cap);
        }
        self.volume += dt * self.wall.velocity(self.time);
        self.time += dt;
        self.taken += 1;
        Ok(self.time)
    }

    fn state(&self) -> ReactorState {
        let ratio = 1.0 / self.volume;
        let pressure = match &self.pressure_signal {
            Some(signal) => signal(self.time),
            None => self.p0 * ratio.powf(self.gamma),
        };
        ReactorState {
            time: self.time,
            temperature: self.t0 * ratio.powf(self.gamma - 1.0),
            pressure,
            volume: self.volume,
            mass_fractions: self.mass_fractions.clone(),
        }
    }

    fn set_max_time_step(&mut self, max_dt: Time) {
        self.max_dt = Some(max_dt);
    }
}

// =================================================================================================
// Mechanism
// =================================================================================================

pub struct MockMechanism {
    pub species: Vec<String>,
    pub gamma: f64,
    pub steps: Vec<f64>,
    pub pressure_signal: Option<Signal>,
    /// Composition basis of every reactor built
    pub bases: Mutex<Vec<&'static str>>,
}

impl MockMechanism {
    pub fn new(steps: Vec<f64>) -> Self {
        Self {
            species: ["N2", "O2", "H2", "OH"].iter().map(|s| s.to_string()).collect(),
            gamma: 1.4,
            steps,
            pressure_signal: None,
            bases: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pressure_signal(mut self, signal: Signal) -> Self {
        self.pressure_signal = Some(signal);
        self
    }
}

impl Mechanism for MockMechanism {
    type Phase = MockPhase;
    type Net = MockReactor;

    fn name(&self) -> &str {
        "mock"
    }

    fn new_phase(&self) -> Result<MockPhase> {
        Ok(MockPhase {
            species: self.species.clone(),
            gamma: self.gamma,
            temperature: 300.0,
            pressure: 101_325.0,
            mass_fractions: vec![0.0; self.species.len()],
            basis: None,
        })
    }

    fn build_reactor(&self, phase: &MockPhase, wall: Box<dyn WallVelocity>) -> Result<MockReactor> {
        if let Some(basis) = phase.basis {
            self.bases.lock().unwrap().push(basis);
        }
        Ok(MockReactor {
            time: 0.0,
            volume: 1.0,
            gamma: self.gamma,
            t0: phase.temperature(),
            p0: phase.pressure(),
            mass_fractions: phase.mass_fractions().to_vec(),
            wall,
            steps: self.steps.clone(),
            taken: 0,
            max_dt: None,
            pressure_signal: self.pressure_signal.clone(),
        })
    }
}

// =================================================================================================
// Case builders
// =================================================================================================

pub fn species_key() -> SpeciesKey {
    [("H2", "H2"), ("O2", "O2"), ("N2", "N2")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Stoichiometric hydrogen-air at 1000 K and 1 bar
pub fn properties(ignition_delay: f64, target: &str, criterion: IgnitionCriterion) -> CaseProperties {
    CaseProperties {
        temperature: Quantity::new(1000.0, Unit::Kelvin),
        pressure: Quantity::new(1.0, Unit::Bar),
        composition: vec![
            SpeciesAmount { species_name: "H2".into(), amount: 0.296 },
            SpeciesAmount { species_name: "O2".into(), amount: 0.148 },
            SpeciesAmount { species_name: "N2".into(), amount: 0.556 },
        ],
        composition_type: "mole fraction".into(),
        ignition_delay: Quantity::seconds(ignition_delay),
        pressure_rise: None,
        volume_history: None,
        compression_time: None,
        ignition_type: IgnitionType {
            target: target.into(),
            criterion,
        },
    }
}

pub fn case(id: &str, apparatus: Apparatus, properties: CaseProperties) -> Simulation<MockMechanism> {
    Simulation::new(ExperimentKind::IgnitionDelay, apparatus, CaseMeta::new(id), properties)
}

/// Pressure jumping from 1 to 2 bar at `at`
pub fn pressure_step(at: f64) -> Signal {
    Arc::new(move |t: f64| if t < at { 1.0e5 } else { 2.0e5 })
}
