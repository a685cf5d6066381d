//! Domain bounds: named scalar measurements against configured ranges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rigor_ledger::{Finding, FindingSource, Severity, Verdict};

/// Inclusive `[min, max]` range for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `Some(true)` inside, `Some(false)` strictly outside, `None` if not finite.
    pub fn contains(&self, value: f64) -> Option<bool> {
        if !value.is_finite() {
            None
        } else {
            Some(self.min <= value && value <= self.max)
        }
    }
}

/// Parameter name to expected range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundsConfig {
    ranges: BTreeMap<String, Range>,
}

impl BoundsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the range for one parameter.
    pub fn add(&mut self, name: impl Into<String>, min: f64, max: f64) -> &mut Self {
        self.ranges.insert(name.into(), Range::new(min, max));
        self
    }

    pub fn with(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.add(name, min, max);
        self
    }

    /// Merge another table into this one; its entries win.
    pub fn update(&mut self, other: &BoundsConfig) {
        self.ranges
            .extend(other.ranges.iter().map(|(k, v)| (k.clone(), *v)));
    }

    pub fn get(&self, name: &str) -> Option<Range> {
        self.ranges.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Range)> {
        self.ranges.iter()
    }
}

/// Check measured values. Names without a configured range are ignored.
pub fn check_bounds(measurements: &BTreeMap<String, f64>, config: &BoundsConfig) -> Verdict {
    let mut verdict = Verdict::new();
    for (name, value) in measurements {
        let Some(range) = config.get(name) else {
            continue;
        };
        match range.contains(*value) {
            Some(true) => {}
            Some(false) => verdict.push(
                Finding::new(
                    FindingSource::Bounds,
                    Severity::Warning,
                    "bounds.out-of-range",
                    format!(
                        "Value {value} for '{name}' is outside expected range [{}, {}]. \
                         This may indicate an instrument issue, analysis error, or genuinely \
                         unusual measurement. Investigate before proceeding.",
                        range.min, range.max
                    ),
                )
                .with_subject(name.clone()),
            ),
            None => verdict.push(
                Finding::new(
                    FindingSource::Bounds,
                    Severity::Warning,
                    "bounds.non-finite",
                    format!("Value {value} for '{name}' is not finite and cannot be range-checked."),
                )
                .with_subject(name.clone()),
            ),
        }
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temperature() -> BoundsConfig {
        BoundsConfig::new().with("temperature", 0.0, 1000.0)
    }

    fn measure(name: &str, value: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([(name.to_string(), value)])
    }

    #[test]
    fn test_out_of_range_warns_with_name() {
        let v = check_bounds(&measure("temperature", 1500.0), &temperature());
        assert_eq!(v.len(), 1);
        let f = &v.findings[0];
        assert_eq!(f.severity, Severity::Warning);
        assert!(f.message.contains("temperature"));
    }

    #[test]
    fn test_in_range_is_silent() {
        assert!(check_bounds(&measure("temperature", 500.0), &temperature()).is_empty());
    }

    #[test]
    fn test_edges_are_inclusive() {
        let cfg = temperature();
        assert!(check_bounds(&measure("temperature", 0.0), &cfg).is_empty());
        assert!(check_bounds(&measure("temperature", 1000.0), &cfg).is_empty());
    }

    #[test]
    fn test_unconfigured_names_ignored() {
        assert!(check_bounds(&measure("pressure", 1e9), &temperature()).is_empty());
    }

    #[test]
    fn test_non_finite_values_are_flagged() {
        let cfg = temperature();
        let v = check_bounds(&measure("temperature", f64::INFINITY), &cfg);
        assert_eq!(v.findings[0].rule_id, "bounds.non-finite");
        let v = check_bounds(&measure("temperature", f64::NAN), &cfg);
        assert_eq!(v.findings[0].rule_id, "bounds.non-finite");
    }

    #[test]
    fn test_update_overrides_existing_ranges() {
        let mut cfg = temperature();
        cfg.update(&BoundsConfig::new().with("temperature", 0.0, 2000.0).with("ph", 0.0, 14.0));
        assert_eq!(cfg.len(), 2);
        assert!(check_bounds(&measure("temperature", 1500.0), &cfg).is_empty());
    }

    #[test]
    fn test_bounds_config_toml_table() {
        let cfg: BoundsConfig =
            toml::from_str("temperature = { min = 0.0, max = 1000.0 }\n").unwrap();
        assert_eq!(cfg.get("temperature"), Some(Range::new(0.0, 1000.0)));
    }
}
