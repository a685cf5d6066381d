//! Statistical validation of the dataset a submission is about to use.
//!
//! Data problems are always reviewable by a human, so this checker only ever
//! produces WARNING and INFO findings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rigor_ledger::{Finding, FindingSource, Severity, Verdict};

/// Added to the standard deviation before dividing, as in the roughness ratio.
const ROUGHNESS_EPSILON: f64 = 1e-10;

/// Column-wise numeric summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    /// Total number of samples, including NaN and Inf.
    pub count: usize,
    #[serde(default)]
    pub nan_count: usize,
    #[serde(default)]
    pub inf_count: usize,
    /// Population variance of the finite samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    /// std(first differences) / std(values); small means suspiciously smooth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness: Option<f64>,
    /// Every sample is exactly zero.
    #[serde(default)]
    pub all_zero: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ColumnSummary {
    /// Summarise raw samples.
    pub fn from_values(name: impl Into<String>, values: &[f64]) -> Self {
        let nan_count = values.iter().filter(|v| v.is_nan()).count();
        let inf_count = values.iter().filter(|v| v.is_infinite()).count();
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();

        let variance = population_variance(&finite);
        let roughness = match (finite.len() >= 2, variance) {
            (true, Some(var)) => {
                let diffs: Vec<f64> = finite.windows(2).map(|w| w[1] - w[0]).collect();
                population_variance(&diffs)
                    .map(|dvar| dvar.sqrt() / (var.sqrt() + ROUGHNESS_EPSILON))
            }
            _ => None,
        };

        Self {
            name: name.into(),
            count: values.len(),
            nan_count,
            inf_count,
            variance,
            roughness,
            all_zero: !values.is_empty() && values.iter().all(|v| *v == 0.0),
            min: finite.iter().copied().reduce(f64::min),
            max: finite.iter().copied().reduce(f64::max),
        }
    }

    pub fn finite_count(&self) -> usize {
        self.count
            .saturating_sub(self.nan_count.saturating_add(self.inf_count))
    }

    pub fn nan_fraction(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.nan_count as f64 / self.count as f64
        }
    }
}

fn population_variance(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n)
}

/// The dataset a submission will run against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    #[serde(default)]
    pub columns: Vec<ColumnSummary>,
    /// Named scalar measurements, checked against configured bounds.
    #[serde(default)]
    pub measurements: BTreeMap<String, f64>,
}

impl DatasetSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, column: ColumnSummary) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_values(self, name: impl Into<String>, values: &[f64]) -> Self {
        self.with_column(ColumnSummary::from_values(name, values))
    }

    pub fn with_measurement(mut self, name: impl Into<String>, value: f64) -> Self {
        self.measurements.insert(name.into(), value);
        self
    }
}

/// Validator thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Roughness below this flags a column as suspiciously smooth.
    pub smoothness_threshold: f64,
    /// Smoothness is only judged above this many finite samples.
    pub min_smoothness_samples: usize,
    /// NaN fraction above which the NaN warning says the data may be corrupted.
    pub nan_fraction_alarm: f64,
    /// Emit one INFO summary per validated column.
    pub summarize_columns: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            smoothness_threshold: 1e-4,
            min_smoothness_samples: 1000,
            nan_fraction_alarm: 0.5,
            summarize_columns: true,
        }
    }
}

/// Check every column of the snapshot.
pub fn validate_dataset(snapshot: &DatasetSnapshot, config: &ValidatorConfig) -> Verdict {
    let mut verdict = Verdict::new();
    for column in &snapshot.columns {
        validate_column(column, config, &mut verdict);
    }
    verdict
}

fn warn(column: &ColumnSummary, rule_id: &str, message: String) -> Finding {
    Finding::new(FindingSource::Data, Severity::Warning, rule_id, message)
        .with_subject(column.name.clone())
}

fn validate_column(column: &ColumnSummary, config: &ValidatorConfig, out: &mut Verdict) {
    let name = &column.name;

    if column.count == 0 {
        out.push(warn(column, "data.empty", format!("{name}: column is empty, no data to analyze")));
        return;
    }

    if column.nan_count > 0 {
        let pct = 100.0 * column.nan_fraction();
        let message = if column.nan_fraction() > config.nan_fraction_alarm {
            format!("{name}: {pct:.1}% NaN values, data may be corrupted")
        } else {
            format!("{name}: {pct:.1}% NaN values detected")
        };
        out.push(warn(column, "data.nan", message));
    }

    if column.inf_count > 0 {
        out.push(warn(
            column,
            "data.inf",
            format!(
                "{name}: {} Inf values detected, check instrument saturation",
                column.inf_count
            ),
        ));
    }

    if column.finite_count() > 0 && column.variance.is_some_and(|v| v <= 0.0) {
        out.push(warn(
            column,
            "data.zero-variance",
            format!("{name}: zero variance, possible recording failure or disconnection"),
        ));
    }

    if column.all_zero {
        out.push(warn(
            column,
            "data.all-zero",
            format!("{name}: all zeros, check instrument connection"),
        ));
    }

    if column.finite_count() > config.min_smoothness_samples {
        if let Some(r) = column.roughness {
            if r < config.smoothness_threshold {
                out.push(warn(
                    column,
                    "data.too-smooth",
                    format!(
                        "{name}: suspiciously smooth (roughness {r:.2e}), real data typically has noise"
                    ),
                ));
            }
        }
    }

    if config.summarize_columns {
        let range = match (column.min, column.max) {
            (Some(lo), Some(hi)) => format!(", range [{lo}, {hi}]"),
            _ => String::new(),
        };
        out.push(
            Finding::new(
                FindingSource::Data,
                Severity::Info,
                "data.summary",
                format!(
                    "{name}: n={} ({} finite){range}",
                    column.count,
                    column.finite_count()
                ),
            )
            .with_subject(name.clone()),
        );
    }
}
