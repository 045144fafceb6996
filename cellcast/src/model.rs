use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::CellcastError;

/// One predicted point of the capacity fade curve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Whole cycle number; integral floats such as `101.0` are accepted.
    #[serde(deserialize_with = "integral_cycle")]
    pub cycle: i64,
    /// Capacity in mAh.
    pub capacity: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PredictionMeta {
    #[serde(default, deserialize_with = "insights_or_empty")]
    pub insights: Vec<String>,
}

/// Document returned by `POST /predict`.
///
/// `predictions` is required and strictly typed. `meta` is advisory: a
/// missing, null or oddly shaped `meta` (or `meta.insights`) reads as "no
/// insights" rather than failing the whole response.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub predictions: Vec<Prediction>,
    #[serde(default, deserialize_with = "meta_or_default")]
    pub meta: PredictionMeta,
}

impl PredictionResult {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self, CellcastError> {
        let text = std::fs::read_to_string(path).map_err(|source| CellcastError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_json(&text)?)
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn insights(&self) -> &[String] {
        &self.meta.insights
    }
}

fn integral_cycle<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Number::deserialize(deserializer)?;
    if let Some(cycle) = value.as_i64() {
        return Ok(cycle);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        _ => Err(D::Error::custom(format!(
            "cycle must be a whole number, got {value}"
        ))),
    }
}

fn meta_or_default<'de, D>(deserializer: D) -> Result<PredictionMeta, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

fn insights_or_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    let JsonValue::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            JsonValue::String(text) => Some(text),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default())
}
