//! Ignition delay cases: setup, integration and post-processing.

use crate::config::RunConfig;
use crate::driver::{CancelToken, DriverReport, IntegrationDriver};
use crate::storage::{trajectory_path, TrajectoryHeader, TrajectoryTable, TrajectoryWriter};
use ignis_core::{Dimension, IgnisError, Mechanism, Quantity, ReactorNet, Result, ThermoPhase, Time};
use ignis_delay::{resolve_target, IgnitionAnalyzer, IgnitionCriterion, IgnitionDelayResult, IgnitionTarget};
use ignis_wall::{VelocityProfile, VolumeHistory, Wall};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

/// Maps species names used in case files onto mechanism species names
pub type SpeciesKey = HashMap<String, String>;

// =============================================================================
// CASE DESCRIPTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentKind {
    #[serde(rename = "ignition delay")]
    IgnitionDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Apparatus {
    #[serde(rename = "shock tube")]
    ShockTube,
    #[serde(rename = "rapid compression machine")]
    RapidCompressionMachine,
}

impl fmt::Display for Apparatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Apparatus::ShockTube => write!(f, "shock tube"),
            Apparatus::RapidCompressionMachine => write!(f, "rapid compression machine"),
        }
    }
}

/// Basis of the reactant amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionType {
    MoleFraction,
    MolePercent,
    MassFraction,
}

impl CompositionType {
    pub fn is_molar(&self) -> bool {
        matches!(self, CompositionType::MoleFraction | CompositionType::MolePercent)
    }
}

impl FromStr for CompositionType {
    type Err = IgnisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mole fraction" => Ok(CompositionType::MoleFraction),
            "mole percent" => Ok(CompositionType::MolePercent),
            "mass fraction" => Ok(CompositionType::MassFraction),
            other => Err(IgnisError::UnsupportedComposition(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesAmount {
    pub species_name: String,
    pub amount: f64,
}

/// Signal and criterion that define ignition in the experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnitionType {
    pub target: String,
    #[serde(rename = "type")]
    pub criterion: IgnitionCriterion,
}

/// Experimental conditions of one datapoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseProperties {
    pub temperature: Quantity,
    pub pressure: Quantity,
    pub composition: Vec<SpeciesAmount>,
    /// "mole fraction", "mole percent" or "mass fraction"
    pub composition_type: String,
    /// Measured ignition delay
    pub ignition_delay: Quantity,
    /// Fractional pressure rise rate behind the reflected shock
    #[serde(default)]
    pub pressure_rise: Option<Quantity>,
    /// Time in seconds, volume in arbitrary units
    #[serde(default)]
    pub volume_history: Option<VolumeHistory>,
    /// End of compression for rapid compression machines
    #[serde(default)]
    pub compression_time: Option<Quantity>,
    pub ignition_type: IgnitionType,
}

/// Identity of a case and its simulated results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMeta {
    pub id: String,
    #[serde(default)]
    pub save_file: Option<PathBuf>,
    #[serde(default)]
    pub simulated_ignition_delay: Option<Quantity>,
    /// Absent unless ignition had two stages
    #[serde(default)]
    pub simulated_first_stage_delay: Option<Quantity>,
}

impl CaseMeta {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    /// First-stage delay in seconds, NaN for single-stage or unprocessed cases
    pub fn first_stage_delay_or_nan(&self) -> f64 {
        self.simulated_first_stage_delay
            .as_ref()
            .map_or(f64::NAN, Quantity::to_si)
    }
}

/// Result of [`Simulation::run_case`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed(DriverReport),
    /// Trajectory file already present on restart
    Skipped,
}

/// Value of `q` in SI units, checked against the expected dimension
fn si(q: &Quantity, dimension: Dimension, what: &str) -> Result<f64> {
    if q.unit.dimension() != dimension {
        return Err(IgnisError::InvalidInput(format!(
            "{what} given in {}, expected a {dimension:?} unit",
            q.unit.symbol()
        )));
    }
    Ok(q.to_si())
}

// =============================================================================
// SIMULATION
// =============================================================================

/// Everything `setup_case` decides
struct PreparedCase<N> {
    reactor: Option<N>,
    end_time: Time,
    target: IgnitionTarget,
    criterion: IgnitionCriterion,
    species: Vec<String>,
    wall_kind: &'static str,
    max_time_step: Option<Time>,
    compression_time: Option<Time>,
}

/// One ignition delay datapoint simulated with mechanism `M`
pub struct Simulation<M: Mechanism> {
    pub kind: ExperimentKind,
    pub apparatus: Apparatus,
    pub meta: CaseMeta,
    pub properties: CaseProperties,
    prepared: Option<PreparedCase<M::Net>>,
    driver: IntegrationDriver,
    analyzer: IgnitionAnalyzer,
    cancel: Option<CancelToken>,
}

impl<M: Mechanism> Simulation<M> {
    pub fn new(kind: ExperimentKind, apparatus: Apparatus, meta: CaseMeta, properties: CaseProperties) -> Self {
        Self {
            kind,
            apparatus,
            meta,
            properties,
            prepared: None,
            driver: IntegrationDriver::default(),
            analyzer: IgnitionAnalyzer::default(),
            cancel: None,
        }
    }

    /// Abort `run_case` between integrator steps once `token` is cancelled
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.set_cancel_token(token);
        self
    }

    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.driver = self.driver.clone().with_cancel_token(token.clone());
        self.cancel = Some(token);
    }

    /// Build the reactor and decide everything needed to run the case.
    ///
    /// Fails before any integration on an unmapped species, an unsupported
    /// composition type or an inconsistent unit.
    #[instrument(skip_all, fields(case = %self.meta.id))]
    pub fn setup_case(
        &mut self,
        mechanism: &M,
        species_key: &SpeciesKey,
        output_dir: &Path,
        config: &RunConfig,
    ) -> Result<()> {
        let props = &self.properties;

        let ignition_delay = si(&props.ignition_delay, Dimension::Time, "ignition delay")?;
        let end_time = config.end_time_factor * ignition_delay;
        if !(end_time > 0.0) || !end_time.is_finite() {
            return Err(IgnisError::InvalidInput(format!(
                "end time must be positive, got {end_time} s"
            )));
        }
        let temperature = si(&props.temperature, Dimension::Temperature, "temperature")?;
        let pressure = si(&props.pressure, Dimension::Pressure, "pressure")?;
        let compression_time = props
            .compression_time
            .as_ref()
            .map(|q| si(q, Dimension::Time, "compression time"))
            .transpose()?;

        let reactants = props
            .composition
            .iter()
            .map(|s| {
                species_key
                    .get(&s.species_name)
                    .map(|name| (name.clone(), s.amount))
                    .ok_or_else(|| IgnisError::SpeciesKeyMissing(s.species_name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let composition_type: CompositionType = props.composition_type.parse()?;
        let mut phase = mechanism.new_phase()?;
        if composition_type.is_molar() {
            phase.set_tpx(temperature, pressure, &reactants)?;
        } else {
            phase.set_tpy(temperature, pressure, &reactants)?;
        }

        let wall = match (self.apparatus, &props.pressure_rise, &props.volume_history) {
            (Apparatus::ShockTube, None, _) => Wall::Stationary,
            (Apparatus::ShockTube, Some(rise), _) => {
                let rate = si(rise, Dimension::Rate, "pressure rise")?;
                Wall::Moving(VelocityProfile::from_pressure_rise(
                    &phase,
                    rate,
                    end_time,
                    config.pressure_sampling_hz,
                )?)
            }
            (Apparatus::RapidCompressionMachine, _, None) => Wall::Stationary,
            (Apparatus::RapidCompressionMachine, _, Some(history)) => {
                Wall::Moving(VelocityProfile::from_volume_history(history)?)
            }
        };
        let wall_kind = wall.kind();

        let mut reactor = mechanism.build_reactor(&phase, wall.boxed())?;
        let max_time_step = props.volume_history.as_ref().map(VolumeHistory::min_time_step);
        if let Some(dt) = max_time_step {
            reactor.set_max_time_step(dt);
        }

        let species = phase.species_names();
        let resolution = resolve_target(&props.ignition_type.target, props.ignition_type.criterion, &species);
        for diagnostic in &resolution.diagnostics {
            warn!("{diagnostic}");
        }

        debug!(
            mechanism = mechanism.name(),
            apparatus = %self.apparatus,
            wall = wall_kind,
            end_time,
            max_time_step = ?max_time_step,
            ignition_target = %resolution.target,
            criterion = %resolution.criterion,
            "case set up"
        );

        self.meta.save_file = Some(trajectory_path(output_dir, &self.meta.id));
        self.driver = match &self.cancel {
            Some(token) => config.driver().with_cancel_token(token.clone()),
            None => config.driver(),
        };
        self.analyzer = IgnitionAnalyzer::new(config.peak_detector.clone());
        self.prepared = Some(PreparedCase {
            reactor: Some(reactor),
            end_time,
            target: resolution.target,
            criterion: resolution.criterion,
            species,
            wall_kind,
            max_time_step,
            compression_time,
        });
        Ok(())
    }

    /// Integrate to the end time, streaming every state to the trajectory
    /// file. With `restart`, a case whose file already exists is skipped.
    #[instrument(skip_all, fields(case = %self.meta.id))]
    pub fn run_case(&mut self, restart: bool) -> Result<RunOutcome> {
        let save_file = self.save_file()?.to_path_buf();
        if restart && save_file.exists() {
            info!(path = %save_file.display(), "Skipped existing case");
            return Ok(RunOutcome::Skipped);
        }

        let id = self.meta.id.clone();
        let prepared = self
            .prepared
            .as_mut()
            .ok_or_else(|| IgnisError::NotSetUp(id.clone()))?;
        let mut reactor = prepared
            .reactor
            .take()
            .ok_or_else(|| IgnisError::NotSetUp(format!("{id}: reactor already integrated")))?;

        let header = TrajectoryHeader::new(&id, prepared.species.clone());
        let mut writer = TrajectoryWriter::create(&save_file, &header)?;
        match self.driver.integrate(&mut reactor, prepared.end_time, &mut writer) {
            Ok(report) => {
                writer.finish()?;
                info!(steps = report.steps, final_time = report.final_time, "Done with case");
                Ok(RunOutcome::Completed(report))
            }
            Err(e) => {
                if let Err(cleanup) = writer.abandon() {
                    warn!(error = %cleanup, "could not remove unfinished trajectory");
                }
                Err(e)
            }
        }
    }

    /// Extract the simulated ignition delay(s) from the stored trajectory
    /// and record them in the case metadata.
    #[instrument(skip_all, fields(case = %self.meta.id))]
    pub fn process_results(&mut self) -> Result<IgnitionDelayResult> {
        let save_file = self.save_file()?;
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| IgnisError::NotSetUp(self.meta.id.clone()))?;

        let table = TrajectoryTable::open(save_file)?;
        let signal = table.target_column(prepared.target)?;
        let result = self.analyzer.extract(
            &table.time.to_vec(),
            &signal.to_vec(),
            prepared.criterion,
            prepared.compression_time,
        )?;

        if result.overall == 0.0 {
            debug!(ignition_target = %prepared.target, "no ignition detected");
        }
        self.meta.simulated_ignition_delay = Some(Quantity::seconds(result.overall));
        self.meta.simulated_first_stage_delay = result.first_stage.map(Quantity::seconds);
        Ok(result)
    }

    fn save_file(&self) -> Result<&Path> {
        self.meta
            .save_file
            .as_deref()
            .ok_or_else(|| IgnisError::NotSetUp(self.meta.id.clone()))
    }

    pub fn is_set_up(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn end_time(&self) -> Option<Time> {
        self.prepared.as_ref().map(|p| p.end_time)
    }

    pub fn target(&self) -> Option<IgnitionTarget> {
        self.prepared.as_ref().map(|p| p.target)
    }

    pub fn criterion(&self) -> Option<IgnitionCriterion> {
        self.prepared.as_ref().map(|p| p.criterion)
    }

    /// Step cap taken from the volume history, if any
    pub fn max_time_step(&self) -> Option<Time> {
        self.prepared.as_ref().and_then(|p| p.max_time_step)
    }

    /// "stationary", "volume history" or "pressure rise"
    pub fn wall_kind(&self) -> Option<&'static str> {
        self.prepared.as_ref().map(|p| p.wall_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignis_core::Unit;

    #[test]
    fn test_composition_types() {
        assert!("mole fraction".parse::<CompositionType>().unwrap().is_molar());
        assert!("mole percent".parse::<CompositionType>().unwrap().is_molar());
        assert!(!"mass fraction".parse::<CompositionType>().unwrap().is_molar());
        assert!(matches!(
            "volume fraction".parse::<CompositionType>(),
            Err(IgnisError::UnsupportedComposition(s)) if s == "volume fraction"
        ));
    }

    #[test]
    fn test_si_checks_dimension() {
        assert_eq!(si(&Quantity::new(2.0, Unit::Millisecond), Dimension::Time, "delay").unwrap(), 2.0e-3);
        assert_eq!(si(&Quantity::new(1.0, Unit::Bar), Dimension::Pressure, "p").unwrap(), 1.0e5);
        assert!(si(&Quantity::new(1.0, Unit::Kelvin), Dimension::Time, "delay").is_err());
    }

    #[test]
    fn test_case_properties_from_json() {
        let json = r#"{
            "temperature": {"value": 1000.0, "unit": "Kelvin"},
            "pressure": {"value": 20.0, "unit": "Atmosphere"},
            "composition": [
                {"species_name": "H2", "amount": 0.1},
                {"species_name": "O2", "amount": 0.05},
                {"species_name": "Ar", "amount": 0.85}
            ],
            "composition_type": "mole fraction",
            "ignition_delay": {"value": 150.0, "unit": "Microsecond"},
            "volume_history": {"time": [0.0, 0.01, 0.02], "volume": [5.0, 4.0, 3.0]},
            "ignition_type": {"target": "OH*", "type": "d/dt max"}
        }"#;
        let props: CaseProperties = serde_json::from_str(json).unwrap();
        assert_eq!(props.composition.len(), 3);
        assert_eq!(props.ignition_type.criterion, IgnitionCriterion::DerivativeMax);
        assert!(props.pressure_rise.is_none());
        assert!(props.compression_time.is_none());
        assert_eq!(props.volume_history.unwrap().len(), 3);

        let apparatus: Apparatus = serde_json::from_str(r#""rapid compression machine""#).unwrap();
        assert_eq!(apparatus, Apparatus::RapidCompressionMachine);
        let kind: ExperimentKind = serde_json::from_str(r#""ignition delay""#).unwrap();
        assert_eq!(kind, ExperimentKind::IgnitionDelay);
    }

    #[test]
    fn test_bad_volume_history_rejected_on_load() {
        let json = r#"{"time": [0.0, 0.01], "volume": [1.0, 0.5]}"#;
        assert!(serde_json::from_str::<VolumeHistory>(json).is_err());
    }
}
