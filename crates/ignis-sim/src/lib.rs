//! # Ignis-Sim
//!
//! Runs ignition delay experiments against an external kinetic mechanism.
//!
//! ## Pipeline
//!
//! ```text
//! CaseProperties ──setup_case──▶ reactor + wall + target
//!                 ──run_case───▶ <output>/<id>.jsonl
//!                 ──process_results──▶ simulated delay(s)
//! ```
//!
//! The reactor is advanced one native step at a time by
//! [`IntegrationDriver`], which replaces the step that overshoots the end
//! time by a state interpolated exactly at the end time. Cases are
//! independent and [`run_batch`] spreads them over the rayon pool.

pub mod batch;
pub mod case;
pub mod config;
pub mod driver;
pub mod storage;

pub use batch::{run_batch, run_batch_with_cancel, CaseReport, CaseSummary};
pub use case::{
    Apparatus, CaseMeta, CaseProperties, CompositionType, ExperimentKind, IgnitionType, RunOutcome, Simulation,
    SpeciesAmount, SpeciesKey,
};
pub use config::RunConfig;
pub use driver::{CancelToken, DriverReport, IntegrationDriver, StepSink};
pub use storage::{trajectory_path, TrajectoryHeader, TrajectoryTable, TrajectoryWriter, TRAJECTORY_EXTENSION};

/// Prelude for common imports
pub mod prelude {
    pub use crate::batch::{run_batch, run_batch_with_cancel};
    pub use crate::case::{Apparatus, CaseMeta, CaseProperties, ExperimentKind, Simulation, SpeciesKey};
    pub use crate::config::RunConfig;
    pub use crate::driver::{CancelToken, IntegrationDriver};
    pub use ignis_core::{IgnisError, Mechanism, Quantity, ReactorNet, ReactorState, Result, ThermoPhase, Unit};
    pub use ignis_delay::{IgnitionCriterion, IgnitionDelayResult, IgnitionTarget};
}
