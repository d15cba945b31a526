//! Trajectory files.
//!
//! A trajectory is stored as JSON Lines: one header object naming the case
//! and its species, then one [`ReactorState`] per row. Rows are streamed to
//! `<file>.partial` and the file is renamed into place only once complete,
//! so the presence of the final path marks a finished case. Non-finite
//! values have no JSON form and are refused on write.

use crate::driver::StepSink;
use ignis_core::{IgnisError, ReactorState, Result, StateField, Trajectory};
use ignis_delay::IgnitionTarget;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TRAJECTORY_EXTENSION: &str = "jsonl";

const PARTIAL_SUFFIX: &str = "partial";

/// First line of a trajectory file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryHeader {
    pub case_id: String,
    pub species: Vec<String>,
    pub n_species: usize,
}

impl TrajectoryHeader {
    pub fn new(case_id: &str, species: Vec<String>) -> Self {
        Self {
            case_id: case_id.to_string(),
            n_species: species.len(),
            species,
        }
    }
}

/// `<dir>/<case_id>.jsonl`
pub fn trajectory_path(dir: &Path, case_id: &str) -> PathBuf {
    dir.join(format!("{case_id}.{TRAJECTORY_EXTENSION}"))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

// =============================================================================
// WRITER
// =============================================================================

/// Streams reactor states to disk
pub struct TrajectoryWriter {
    path: PathBuf,
    partial: PathBuf,
    out: BufWriter<File>,
    n_species: usize,
    rows: usize,
}

impl TrajectoryWriter {
    pub fn create(path: &Path, header: &TrajectoryHeader) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(path);
        let mut out = BufWriter::new(File::create(&partial)?);
        serde_json::to_writer(&mut out, header)?;
        out.write_all(b"\n")?;

        Ok(Self {
            path: path.to_path_buf(),
            partial,
            out,
            n_species: header.n_species,
            rows: 0,
        })
    }

    pub fn append(&mut self, state: &ReactorState) -> Result<()> {
        if state.n_species() != self.n_species {
            return Err(IgnisError::LengthMismatch {
                expected: self.n_species,
                got: state.n_species(),
            });
        }
        if !state.is_finite() {
            return Err(IgnisError::NumericalError(format!(
                "non-finite reactor state at t = {} (row {})",
                state.time, self.rows
            )));
        }
        serde_json::to_writer(&mut self.out, state)?;
        self.out.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and move the file to its final path
    pub fn finish(mut self) -> Result<PathBuf> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        fs::rename(&self.partial, &self.path)?;
        debug!(path = %self.path.display(), rows = self.rows, "trajectory written");
        Ok(self.path)
    }

    /// Drop the unfinished file
    pub fn abandon(self) -> Result<()> {
        let partial = self.partial.clone();
        drop(self);
        match fs::remove_file(&partial) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl StepSink for TrajectoryWriter {
    fn record(&mut self, state: &ReactorState) -> Result<()> {
        self.append(state)
    }
}

// =============================================================================
// TABLE
// =============================================================================

/// Column view of a finished trajectory file
#[derive(Debug, Clone)]
pub struct TrajectoryTable {
    pub header: TrajectoryHeader,
    pub time: Array1<f64>,
    pub temperature: Array1<f64>,
    pub pressure: Array1<f64>,
    pub volume: Array1<f64>,
    /// rows x species
    pub mass_fractions: Array2<f64>,
}

impl TrajectoryTable {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines().filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()));

        let header: TrajectoryHeader = match lines.next() {
            Some(line) => serde_json::from_str(&line?)?,
            None => {
                return Err(IgnisError::StorageError(format!(
                    "{} has no header",
                    path.display()
                )))
            }
        };
        if header.species.len() != header.n_species {
            return Err(IgnisError::StorageError(format!(
                "header lists {} species but declares {}",
                header.species.len(),
                header.n_species
            )));
        }

        let mut trajectory = Trajectory::new();
        for line in lines {
            trajectory.push(serde_json::from_str(&line?)?);
        }
        Self::from_trajectory(header, &trajectory)
    }

    /// Columns of an in-memory trajectory
    pub fn from_trajectory(header: TrajectoryHeader, trajectory: &Trajectory) -> Result<Self> {
        let states = trajectory.states();
        if let Some((row, state)) = states
            .iter()
            .enumerate()
            .find(|(_, s)| s.n_species() != header.n_species)
        {
            return Err(IgnisError::StorageError(format!(
                "row {row} has {} mass fractions, expected {}",
                state.n_species(),
                header.n_species
            )));
        }

        let mass_fractions =
            Array2::from_shape_fn((states.len(), header.n_species), |(row, k)| states[row].mass_fractions[k]);

        Ok(Self {
            time: trajectory.column(StateField::Time),
            temperature: trajectory.column(StateField::Temperature),
            pressure: trajectory.column(StateField::Pressure),
            volume: trajectory.column(StateField::Volume),
            mass_fractions,
            header,
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn species(&self) -> &[String] {
        &self.header.species
    }

    pub fn species_column(&self, index: usize) -> Result<ArrayView1<'_, f64>> {
        if index >= self.header.n_species {
            return Err(IgnisError::InvalidInput(format!(
                "species index {index} out of range for {} species",
                self.header.n_species
            )));
        }
        Ok(self.mass_fractions.column(index))
    }

    /// Signal an ignition target is read from
    pub fn target_column(&self, target: IgnitionTarget) -> Result<Array1<f64>> {
        match target {
            IgnitionTarget::Pressure => Ok(self.pressure.clone()),
            IgnitionTarget::Temperature => Ok(self.temperature.clone()),
            IgnitionTarget::Species(index) => Ok(self.species_column(index)?.to_owned()),
        }
    }
}
