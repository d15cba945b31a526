//! Parallel execution of independent cases.

use crate::case::{RunOutcome, Simulation, SpeciesKey};
use crate::config::RunConfig;
use crate::driver::CancelToken;
use ignis_core::{IgnisError, Mechanism, Result};
use ignis_delay::IgnitionDelayResult;
use rayon::prelude::*;
use std::path::Path;
use tracing::{error, info};

/// What a successful case produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaseSummary {
    pub run: RunOutcome,
    pub delay: IgnitionDelayResult,
}

#[derive(Debug)]
pub struct CaseReport {
    pub id: String,
    pub outcome: Result<CaseSummary>,
}

impl CaseReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

fn run_one<M: Mechanism>(
    case: &mut Simulation<M>,
    mechanism: &M,
    species_key: &SpeciesKey,
    output_dir: &Path,
    config: &RunConfig,
) -> Result<CaseSummary> {
    case.setup_case(mechanism, species_key, output_dir, config)?;
    let run = case.run_case(config.restart)?;
    let delay = case.process_results()?;
    Ok(CaseSummary { run, delay })
}

/// Set up, run and process every case on the rayon pool.
///
/// Each worker owns its case's reactor and trajectory writer. A failing case
/// is reported in its [`CaseReport`] and does not stop the others. Reports
/// come back in case order.
pub fn run_batch<M: Mechanism>(
    cases: &mut [Simulation<M>],
    mechanism: &M,
    species_key: &SpeciesKey,
    output_dir: &Path,
    config: &RunConfig,
) -> Vec<CaseReport> {
    run_batch_with_cancel(cases, mechanism, species_key, output_dir, config, None)
}

/// [`run_batch`] that stops every unfinished case once `cancel` fires.
/// Interrupted cases report [`IgnisError::Cancelled`] and leave no
/// trajectory file behind.
pub fn run_batch_with_cancel<M: Mechanism>(
    cases: &mut [Simulation<M>],
    mechanism: &M,
    species_key: &SpeciesKey,
    output_dir: &Path,
    config: &RunConfig,
    cancel: Option<&CancelToken>,
) -> Vec<CaseReport> {
    info!(cases = cases.len(), mechanism = mechanism.name(), "starting batch");

    let reports: Vec<CaseReport> = cases
        .par_iter_mut()
        .map(|case| {
            if let Some(token) = cancel {
                case.set_cancel_token(token.clone());
            }
            let outcome = run_one(case, mechanism, species_key, output_dir, config);
            if let Err(e) = &outcome {
                error!(case = %case.meta.id, error = %e, "case failed");
            }
            CaseReport {
                id: case.meta.id.clone(),
                outcome,
            }
        })
        .collect();

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    let cancelled = reports
        .iter()
        .filter(|r| matches!(r.outcome, Err(IgnisError::Cancelled(_))))
        .count();
    info!(completed = reports.len() - failed, failed, cancelled, "batch finished");
    reports
}
