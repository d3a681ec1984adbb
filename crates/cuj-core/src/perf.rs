//! Performance metrics and the result bag.
//!
//! A [`ResultBag`] collects named samples during a scenario and is written out
//! as one chart file per metric. Unit and improvement direction are fixed by
//! the first insertion of a name; later insertions must agree.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default variant name for a metric.
pub const DEFAULT_VARIANT: &str = "summary";

/// Suffix of the per-metric chart files written by [`ResultBag::save`].
pub const CHART_SUFFIX: &str = ".perf.json";

#[derive(Debug, Error)]
pub enum PerfError {
    #[error("invalid metric name: {0:?}")]
    InvalidName(String),
    #[error("invalid unit for {name}: {unit:?}")]
    InvalidUnit { name: String, unit: String },
    #[error("unit mismatch for {name}: recorded as {existing}, got {requested}")]
    UnitMismatch {
        name: String,
        existing: String,
        requested: String,
    },
    #[error("direction mismatch for {name}")]
    DirectionMismatch { name: String },
    #[error("{name}/{variant} is single-valued and already set")]
    AlreadySet { name: String, variant: String },
    #[error("{name}/{variant} mixes single and cumulative samples")]
    ShapeMismatch { name: String, variant: String },
    #[error("non-finite value for {0}")]
    NonFinite(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PerfError>;

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    SmallerIsBetter,
    BiggerIsBetter,
}

impl Direction {
    /// Chart encoding of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmallerIsBetter => "down",
            Self::BiggerIsBetter => "up",
        }
    }
}

/// Describes a metric; values are supplied separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metric {
    pub name: String,
    pub variant: String,
    pub unit: String,
    pub direction: Direction,
    /// Cumulative metrics hold a list of samples; others hold one value.
    pub multiple: bool,
}

impl Metric {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            variant: DEFAULT_VARIANT.to_string(),
            unit: unit.into(),
            direction,
            multiple: false,
        }
    }

    pub fn cumulative(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if !valid_ident(&self.name, 256) || !valid_ident(&self.variant, 256) {
            return Err(PerfError::InvalidName(format!("{}/{}", self.name, self.variant)));
        }
        if !valid_ident(&self.unit, 32) {
            return Err(PerfError::InvalidUnit {
                name: self.name.clone(),
                unit: self.unit.clone(),
            });
        }
        Ok(())
    }
}

fn valid_ident(s: &str, max: usize) -> bool {
    !s.is_empty()
        && s.len() <= max
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug, Clone, PartialEq)]
struct Samples {
    multiple: bool,
    values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Series {
    unit: String,
    direction: Direction,
    variants: BTreeMap<String, Samples>,
}

/// Append-only collection of named, unit-tagged samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultBag {
    series: BTreeMap<String, Series>,
}

impl ResultBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single-valued metric.
    pub fn set(&mut self, metric: &Metric, value: f64) -> Result<()> {
        let samples = self.slot(metric)?;
        if samples.multiple {
            return Err(PerfError::ShapeMismatch {
                name: metric.name.clone(),
                variant: metric.variant.clone(),
            });
        }
        if !samples.values.is_empty() {
            return Err(PerfError::AlreadySet {
                name: metric.name.clone(),
                variant: metric.variant.clone(),
            });
        }
        samples.values.push(value);
        Ok(())
    }

    /// Append samples to a cumulative metric.
    pub fn append(&mut self, metric: &Metric, values: &[f64]) -> Result<()> {
        let samples = self.slot(metric)?;
        if !samples.multiple {
            return Err(PerfError::ShapeMismatch {
                name: metric.name.clone(),
                variant: metric.variant.clone(),
            });
        }
        samples.values.extend_from_slice(values);
        Ok(())
    }

    /// Record `value` using the metric's own shape.
    pub fn record(&mut self, metric: &Metric, value: f64) -> Result<()> {
        if metric.multiple {
            self.append(metric, &[value])
        } else {
            self.set(metric, value)
        }
    }

    /// Validate the metric and return its sample slot, creating it on first use.
    fn slot(&mut self, metric: &Metric) -> Result<&mut Samples> {
        metric.validate()?;
        let series = self
            .series
            .entry(metric.name.clone())
            .or_insert_with(|| Series {
                unit: metric.unit.clone(),
                direction: metric.direction,
                variants: BTreeMap::new(),
            });
        if series.unit != metric.unit {
            return Err(PerfError::UnitMismatch {
                name: metric.name.clone(),
                existing: series.unit.clone(),
                requested: metric.unit.clone(),
            });
        }
        if series.direction != metric.direction {
            return Err(PerfError::DirectionMismatch {
                name: metric.name.clone(),
            });
        }
        Ok(series
            .variants
            .entry(metric.variant.clone())
            .or_insert_with(|| Samples {
                multiple: metric.multiple,
                values: Vec::new(),
            }))
    }

    /// Samples of the default variant of `name`.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.get_variant(name, DEFAULT_VARIANT)
    }

    pub fn get_variant(&self, name: &str, variant: &str) -> Option<&[f64]> {
        self.series
            .get(name)
            .and_then(|s| s.variants.get(variant))
            .map(|s| s.values.as_slice())
    }

    pub fn unit(&self, name: &str) -> Option<&str> {
        self.series.get(name).map(|s| s.unit.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.series.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Fold another bag into this one, with the same rules as direct insertion.
    pub fn merge(&mut self, other: &ResultBag) -> Result<()> {
        for (name, series) in &other.series {
            for (variant, samples) in &series.variants {
                let mut metric = Metric::new(name.clone(), series.unit.clone(), series.direction)
                    .with_variant(variant.clone());
                metric.multiple = samples.multiple;
                if samples.multiple {
                    self.append(&metric, &samples.values)?;
                } else {
                    for value in &samples.values {
                        self.set(&metric, *value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Chart document for one metric.
    pub fn chart(&self, name: &str) -> Result<Option<Value>> {
        let Some(series) = self.series.get(name) else {
            return Ok(None);
        };
        let mut variants = Map::new();
        for (variant, samples) in &series.variants {
            if samples.values.iter().any(|v| !v.is_finite()) {
                return Err(PerfError::NonFinite(format!("{name}/{variant}")));
            }
            let mut entry = Map::new();
            entry.insert("units".into(), json!(series.unit));
            entry.insert("improvement_direction".into(), json!(series.direction.as_str()));
            if samples.multiple {
                entry.insert("type".into(), json!("list_of_scalar_values"));
                entry.insert("values".into(), json!(samples.values));
            } else {
                entry.insert("type".into(), json!("scalar"));
                entry.insert("value".into(), json!(samples.values.first().copied().unwrap_or(0.0)));
            }
            variants.insert(variant.clone(), Value::Object(entry));
        }
        let mut doc = Map::new();
        doc.insert(name.to_string(), Value::Object(variants));
        Ok(Some(Value::Object(doc)))
    }

    /// Write one `<name>.perf.json` chart per metric into `dir`.
    ///
    /// Returns the written paths in name order.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.series.len());
        for name in self.series.keys() {
            let Some(chart) = self.chart(name)? else {
                continue;
            };
            let path = dir.join(format!("{name}{CHART_SUFFIX}"));
            std::fs::write(&path, serde_json::to_vec_pretty(&chart)?)?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn start_time() -> Metric {
        Metric::new("Browser.StartTime", "ms", Direction::SmallerIsBetter).cumulative()
    }

    #[test]
    fn single_valued_metrics_are_set_once() {
        let mut bag = ResultBag::new();
        let lost = Metric::new("Conference.LostNetworkCount", "count", Direction::SmallerIsBetter);
        bag.set(&lost, 0.0).unwrap();
        assert!(matches!(bag.set(&lost, 1.0), Err(PerfError::AlreadySet { .. })));
        assert_eq!(bag.get("Conference.LostNetworkCount"), Some(&[0.0][..]));
    }

    #[test]
    fn cumulative_metrics_append() {
        let mut bag = ResultBag::new();
        bag.append(&start_time(), &[120.0]).unwrap();
        bag.record(&start_time(), 130.0).unwrap();
        assert_eq!(bag.get("Browser.StartTime"), Some(&[120.0, 130.0][..]));
    }

    #[test]
    fn unit_and_direction_are_fixed_by_first_insert() {
        let mut bag = ResultBag::new();
        bag.append(&start_time(), &[1.0]).unwrap();

        let seconds = Metric::new("Browser.StartTime", "s", Direction::SmallerIsBetter).cumulative();
        assert!(matches!(
            bag.append(&seconds, &[1.0]),
            Err(PerfError::UnitMismatch { .. })
        ));

        let up = Metric::new("Browser.StartTime", "ms", Direction::BiggerIsBetter).cumulative();
        assert!(matches!(
            bag.append(&up, &[1.0]),
            Err(PerfError::DirectionMismatch { .. })
        ));
    }

    #[test]
    fn shapes_cannot_be_mixed() {
        let mut bag = ResultBag::new();
        bag.append(&start_time(), &[1.0]).unwrap();
        let single = Metric::new("Browser.StartTime", "ms", Direction::SmallerIsBetter);
        assert!(matches!(
            bag.set(&single, 1.0),
            Err(PerfError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut bag = ResultBag::new();
        let bad = Metric::new("has space", "ms", Direction::SmallerIsBetter);
        assert!(matches!(bag.set(&bad, 1.0), Err(PerfError::InvalidName(_))));
        let bad_unit = Metric::new("ok", "", Direction::SmallerIsBetter);
        assert!(matches!(bag.set(&bad_unit, 1.0), Err(PerfError::InvalidUnit { .. })));
        assert!(bag.is_empty());
    }

    #[test]
    fn chart_format() {
        let mut bag = ResultBag::new();
        bag.append(&start_time(), &[10.0, 20.0]).unwrap();
        let chart = bag.chart("Browser.StartTime").unwrap().unwrap();
        let summary = &chart["Browser.StartTime"]["summary"];
        assert_eq!(summary["units"], "ms");
        assert_eq!(summary["improvement_direction"], "down");
        assert_eq!(summary["type"], "list_of_scalar_values");
        assert_eq!(summary["values"], json!([10.0, 20.0]));

        let fps = Metric::new("GPU.FPS", "fps", Direction::BiggerIsBetter);
        bag.set(&fps, 59.5).unwrap();
        let chart = bag.chart("GPU.FPS").unwrap().unwrap();
        assert_eq!(chart["GPU.FPS"]["summary"]["type"], "scalar");
        assert_eq!(chart["GPU.FPS"]["summary"]["improvement_direction"], "up");
        assert_eq!(chart["GPU.FPS"]["summary"]["value"], 59.5);
    }

    #[test]
    fn save_writes_one_chart_per_metric() {
        let tmp = TempDir::new().unwrap();
        let mut bag = ResultBag::new();
        bag.append(&start_time(), &[10.0]).unwrap();
        bag.set(
            &Metric::new("GPU.FPS", "fps", Direction::BiggerIsBetter),
            60.0,
        )
        .unwrap();

        let written = bag.save(tmp.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(tmp.path().join("Browser.StartTime.perf.json").exists());
        let raw = std::fs::read_to_string(tmp.path().join("GPU.FPS.perf.json")).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["GPU.FPS"]["summary"]["value"], 60.0);
    }

    #[test]
    fn non_finite_values_fail_on_save() {
        let tmp = TempDir::new().unwrap();
        let mut bag = ResultBag::new();
        bag.append(&start_time(), &[f64::NAN]).unwrap();
        assert!(matches!(bag.save(tmp.path()), Err(PerfError::NonFinite(_))));
    }

    #[test]
    fn merge_respects_insertion_rules() {
        let mut a = ResultBag::new();
        a.append(&start_time(), &[1.0]).unwrap();
        let mut b = ResultBag::new();
        b.append(&start_time(), &[2.0]).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.get("Browser.StartTime"), Some(&[1.0, 2.0][..]));

        let fps = Metric::new("GPU.FPS", "fps", Direction::BiggerIsBetter);
        let mut c = ResultBag::new();
        c.set(&fps, 1.0).unwrap();
        let mut d = ResultBag::new();
        d.set(&fps, 2.0).unwrap();
        assert!(c.merge(&d).is_err());
    }
}
