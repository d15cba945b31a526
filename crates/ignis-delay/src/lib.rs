//! # Ignis-Delay
//!
//! Ignition delay extraction from simulated reactor trajectories.
//!
//! ## Criteria
//!
//! | Label | Criterion | Signal searched |
//! |-------|-----------|-----------------|
//! | `max` | Largest peak | Raw target, derivative if no peak exists |
//! | `d/dt max` | Largest peak of the rate | First time derivative |
//! | `1/2 max` | Half of the largest peak | Raw target, before the peak |
//!
//! ## Two-Stage Ignition
//!
//! Low-temperature chemistry can produce a weak early heat release before
//! the main event. Every detected peak up to and including the largest one
//! counts as a stage; the earliest is reported as the first-stage delay.

use ignis_core::{first_derivative, IgnisError, Result, Time};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Suffix marking an electronically excited radical, e.g. `OH*`
pub const RADICAL_MARKER: char = '*';

// =============================================================================
// PEAK DETECTION
// =============================================================================

/// Steps below this fraction of the signal scale count as flat
pub const DEFAULT_REL_TOLERANCE: f64 = 1.0e-9;

/// Local-maximum detector.
///
/// A sample is a peak when it rises above its left neighbour and does not
/// fall below its right one (rising edge). Differences no larger than
/// `rel_tolerance` times the signal scale are flat, so round-off on a
/// plateau never forms a peak. The first and last samples are never peaks,
/// nor are samples next to a NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetector {
    /// Peaks lower than this are dropped
    pub min_height: Option<f64>,
    /// Peaks closer than this (in samples) to a larger peak are dropped
    pub min_distance: usize,
    /// Minimum rise of a peak above both neighbours
    pub threshold: f64,
    pub rel_tolerance: f64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            min_height: None,
            min_distance: 1,
            threshold: 0.0,
            rel_tolerance: DEFAULT_REL_TOLERANCE,
        }
    }
}

impl PeakDetector {
    /// Indices of peaks in `x`, in increasing order, scaled by `max|x|`
    pub fn detect(&self, x: &[f64]) -> Vec<usize> {
        self.detect_with_scale(x, max_abs(x))
    }

    /// Like [`PeakDetector::detect`] with an explicit magnitude for the
    /// flatness floor. A derivative of a flat signal is pure round-off, so
    /// its own maximum is no measure of what counts as a change.
    pub fn detect_with_scale(&self, x: &[f64], scale: f64) -> Vec<usize> {
        let n = x.len();
        if n < 3 {
            return Vec::new();
        }

        let floor = self.rel_tolerance * scale;
        let dx: Vec<f64> = x
            .windows(2)
            .map(|w| {
                let d = w[1] - w[0];
                if d.is_nan() {
                    f64::INFINITY
                } else if d.abs() <= floor {
                    0.0
                } else {
                    d
                }
            })
            .collect();

        let mut peaks: Vec<usize> = (1..n - 1)
            .filter(|&i| dx[i - 1] > 0.0 && dx[i] <= 0.0)
            .filter(|&i| !(x[i - 1].is_nan() || x[i].is_nan() || x[i + 1].is_nan()))
            .collect();

        if let Some(min_height) = self.min_height {
            peaks.retain(|&i| x[i] >= min_height);
        }

        if self.threshold > 0.0 {
            peaks.retain(|&i| (x[i] - x[i - 1]).min(x[i] - x[i + 1]) >= self.threshold);
        }

        if self.min_distance > 1 && peaks.len() > 1 {
            peaks = self.enforce_distance(x, peaks);
        }

        peaks
    }

    /// Keep the larger of any two peaks within `min_distance` samples
    fn enforce_distance(&self, x: &[f64], peaks: Vec<usize>) -> Vec<usize> {
        let mut by_height = peaks;
        by_height.sort_by(|&a, &b| x[b].total_cmp(&x[a]).then(a.cmp(&b)));

        let mut removed = vec![false; by_height.len()];
        for i in 0..by_height.len() {
            if removed[i] {
                continue;
            }
            let center = by_height[i];
            for (j, &other) in by_height.iter().enumerate() {
                if j != i && other.abs_diff(center) <= self.min_distance {
                    removed[j] = true;
                }
            }
        }

        let mut kept: Vec<usize> = by_height
            .into_iter()
            .zip(removed)
            .filter_map(|(idx, gone)| (!gone).then_some(idx))
            .collect();
        kept.sort_unstable();
        kept
    }
}

// =============================================================================
// IGNITION TARGET
// =============================================================================

/// Signal whose behaviour marks ignition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnitionTarget {
    Pressure,
    Temperature,
    /// Mass fraction column of a species, by mechanism index
    Species(usize),
}

impl fmt::Display for IgnitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnitionTarget::Pressure => write!(f, "pressure"),
            IgnitionTarget::Temperature => write!(f, "temperature"),
            IgnitionTarget::Species(index) => write!(f, "species #{index}"),
        }
    }
}

/// How ignition is located on the target signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnitionCriterion {
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "d/dt max")]
    DerivativeMax,
    #[serde(rename = "1/2 max")]
    HalfMax,
}

impl IgnitionCriterion {
    pub fn label(&self) -> &'static str {
        match self {
            IgnitionCriterion::Max => "max",
            IgnitionCriterion::DerivativeMax => "d/dt max",
            IgnitionCriterion::HalfMax => "1/2 max",
        }
    }
}

impl fmt::Display for IgnitionCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IgnitionCriterion {
    type Err = IgnisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "max" => Ok(IgnitionCriterion::Max),
            "d/dt max" => Ok(IgnitionCriterion::DerivativeMax),
            "1/2 max" => Ok(IgnitionCriterion::HalfMax),
            other => Err(IgnisError::UnsupportedCriterion(other.to_string())),
        }
    }
}

/// Event noticed while resolving an ignition target
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// No candidate name matched a mechanism species
    SpeciesNotFound { label: String, tried: Vec<String> },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SpeciesNotFound { label, tried } => write!(
                f,
                "{label} not found in model (tried {}); falling back on pressure",
                tried.join(", ")
            ),
        }
    }
}

/// Outcome of [`resolve_target`]
#[derive(Debug, Clone, PartialEq)]
pub struct TargetResolution {
    pub target: IgnitionTarget,
    pub criterion: IgnitionCriterion,
    pub diagnostics: Vec<Diagnostic>,
}

/// Map an ignition target label onto a concrete signal.
///
/// `"pressure"` and `"temperature"` resolve directly. Any other label is a
/// species name, tried as given, then lowercased, then (for excited
/// radicals such as `OH*`) without the marker in both cases. When nothing
/// matches, the target falls back to the pressure derivative maximum and a
/// [`Diagnostic`] is attached.
pub fn resolve_target<S: AsRef<str>>(
    label: &str,
    criterion: IgnitionCriterion,
    species: &[S],
) -> TargetResolution {
    match label {
        "pressure" => {
            return TargetResolution {
                target: IgnitionTarget::Pressure,
                criterion,
                diagnostics: Vec::new(),
            }
        }
        "temperature" => {
            return TargetResolution {
                target: IgnitionTarget::Temperature,
                criterion,
                diagnostics: Vec::new(),
            }
        }
        _ => {}
    }

    let mut candidates = vec![label.to_string(), label.to_lowercase()];
    if let Some(ground) = label.strip_suffix(RADICAL_MARKER) {
        candidates.push(ground.to_string());
        candidates.push(ground.to_lowercase());
    }
    candidates.dedup();

    let found = candidates
        .iter()
        .find_map(|name| species.iter().position(|s| s.as_ref() == name));

    match found {
        Some(index) => TargetResolution {
            target: IgnitionTarget::Species(index),
            criterion,
            diagnostics: Vec::new(),
        },
        None => TargetResolution {
            target: IgnitionTarget::Pressure,
            criterion: IgnitionCriterion::DerivativeMax,
            diagnostics: vec![Diagnostic::SpeciesNotFound {
                label: label.to_string(),
                tried: candidates,
            }],
        },
    }
}

// =============================================================================
// DELAY EXTRACTION
// =============================================================================

/// Simulated ignition delay(s) in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IgnitionDelayResult {
    /// Overall delay; zero when no ignition was detected
    pub overall: Time,
    /// First-stage delay, present only for two-stage ignition
    pub first_stage: Option<Time>,
}

impl IgnitionDelayResult {
    pub fn not_detected() -> Self {
        Self {
            overall: 0.0,
            first_stage: None,
        }
    }

    /// Overall delay from the last stage, first-stage delay from the first
    fn from_stages(stages: &[Time]) -> Self {
        match stages {
            [] => Self::not_detected(),
            [only] => Self {
                overall: *only,
                first_stage: None,
            },
            [first, .., last] => Self {
                overall: *last,
                first_stage: Some(*first),
            },
        }
    }
}

/// Locates ignition on a time series
#[derive(Debug, Clone, Default)]
pub struct IgnitionAnalyzer {
    detector: PeakDetector,
}

impl IgnitionAnalyzer {
    pub fn new(detector: PeakDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &PeakDetector {
        &self.detector
    }

    /// Ignition delay(s) of `signal` sampled at `time`.
    ///
    /// `compression_time` shifts the origin for rapid compression machine
    /// cases; peaks at or before it are ignored by the peak criteria.
    pub fn extract(
        &self,
        time: &[Time],
        signal: &[f64],
        criterion: IgnitionCriterion,
        compression_time: Option<Time>,
    ) -> Result<IgnitionDelayResult> {
        if time.len() != signal.len() {
            return Err(IgnisError::LengthMismatch {
                expected: time.len(),
                got: signal.len(),
            });
        }
        if signal.len() < 3 {
            return Ok(IgnitionDelayResult::not_detected());
        }

        match criterion {
            IgnitionCriterion::Max | IgnitionCriterion::DerivativeMax => {
                self.peak_delays(time, signal, criterion, compression_time.unwrap_or(0.0))
            }
            IgnitionCriterion::HalfMax => Ok(self.half_max_delay(time, signal)),
        }
    }

    fn peak_delays(
        &self,
        time: &[Time],
        signal: &[f64],
        criterion: IgnitionCriterion,
        offset: Time,
    ) -> Result<IgnitionDelayResult> {
        let (target, mut peaks) = match criterion {
            IgnitionCriterion::DerivativeMax => self.rate_peaks(time, signal)?,
            _ => (signal.to_vec(), self.detector.detect(signal)),
        };

        // A monotonic approach to equilibrium has no maximum but its rate does
        let target = if peaks.is_empty() && criterion == IgnitionCriterion::Max {
            debug!("no peak in target, retrying on its derivative");
            let (rate, rate_peaks) = self.rate_peaks(time, signal)?;
            peaks = rate_peaks;
            rate
        } else {
            target
        };

        let Some(largest) = largest_peak(&target, &peaks) else {
            return Ok(IgnitionDelayResult::not_detected());
        };

        let stages: Vec<Time> = peaks
            .iter()
            .take_while(|&&i| i <= largest)
            .map(|&i| time[i] - offset)
            .filter(|&delay| delay > 0.0)
            .collect();

        Ok(IgnitionDelayResult::from_stages(&stages))
    }

    /// Time derivative of `signal` and its peaks, flat below the signal's
    /// own magnitude per mean step
    fn rate_peaks(&self, time: &[Time], signal: &[f64]) -> Result<(Vec<f64>, Vec<usize>)> {
        let rate = first_derivative(time, signal)?;
        let span = time[time.len() - 1] - time[0];
        let scale = if span > 0.0 {
            max_abs(signal) * (time.len() - 1) as f64 / span
        } else {
            0.0
        };
        let peaks = self.detector.detect_with_scale(&rate, scale);
        Ok((rate, peaks))
    }

    fn half_max_delay(&self, time: &[Time], signal: &[f64]) -> IgnitionDelayResult {
        let peaks = self.detector.detect(signal);
        let Some(largest) = largest_peak(signal, &peaks) else {
            return IgnitionDelayResult::not_detected();
        };
        let half = 0.5 * signal[largest];

        let mut closest: Option<(usize, f64)> = None;
        for (i, &v) in signal[..largest].iter().enumerate() {
            let distance = (v - half).abs();
            if closest.map_or(true, |(_, best)| distance < best) {
                closest = Some((i, distance));
            }
        }

        match closest {
            Some((i, _)) => IgnitionDelayResult {
                overall: time[i],
                first_stage: None,
            },
            None => IgnitionDelayResult::not_detected(),
        }
    }
}

/// Largest finite magnitude in `x`
fn max_abs(x: &[f64]) -> f64 {
    x.iter().filter(|v| v.is_finite()).fold(0.0, |m, v| m.max(v.abs()))
}

/// Index of the highest peak; the earliest wins ties
fn largest_peak(signal: &[f64], peaks: &[usize]) -> Option<usize> {
    peaks.iter().copied().fold(None, |best, i| match best {
        Some(b) if signal[b] >= signal[i] => Some(b),
        _ => Some(i),
    })
}

/// [`IgnitionAnalyzer::extract`] with the default peak detector
pub fn extract_ignition_delay(
    time: &[Time],
    signal: &[f64],
    criterion: IgnitionCriterion,
    compression_time: Option<Time>,
) -> Result<IgnitionDelayResult> {
    IgnitionAnalyzer::default().extract(time, signal, criterion, compression_time)
}
