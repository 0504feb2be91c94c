//! Core data shapes of the memory layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat scalar payload value. Deserialization order matters for the
/// untagged representation: bool before integer before float before string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    /// Numeric view for range conditions; integers widen to floats.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality with integer/float widening, so `amount: 5` matches a
    /// filter written as `5.0`.
    #[must_use]
    pub fn loosely_equals(&self, other: &Scalar) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Serialized size in bytes, used for the 64 KiB field cap.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Scalar::String(s) => s.len(),
            Scalar::Bool(_) => 1,
            Scalar::Integer(_) | Scalar::Float(_) => 8,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

/// An embedded content record stored in a collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Assigned by the store on first save; never reused after deletion.
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: BTreeMap<String, Scalar>,
    /// SHA-256 of the canonical content string; advisory duplicate marker,
    /// not a uniqueness key.
    pub content_hash: [u8; 32],
}

/// One ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
    pub payload: BTreeMap<String, Scalar>,
}

/// A single field condition inside a [`Filter`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCondition {
    Eq(Scalar),
    Ne(Scalar),
    In(Vec<Scalar>),
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
    },
}

impl FieldCondition {
    /// Whether `value` satisfies this condition. A missing field never
    /// satisfies any condition, which the caller encodes by not calling
    /// this at all.
    #[must_use]
    pub fn matches(&self, value: &Scalar) -> bool {
        match self {
            FieldCondition::Eq(expected) => value.loosely_equals(expected),
            FieldCondition::Ne(expected) => !value.loosely_equals(expected),
            FieldCondition::In(options) => options.iter().any(|o| value.loosely_equals(o)),
            FieldCondition::Range { gte, lte, gt, lt } => {
                let Some(v) = value.as_f64() else {
                    return false;
                };
                gte.map_or(true, |b| v >= b)
                    && lte.map_or(true, |b| v <= b)
                    && gt.map_or(true, |b| v > b)
                    && lt.map_or(true, |b| v < b)
            }
        }
    }
}

/// Conjunction of field conditions, applied inside the vector store so
/// `top_k` is computed over matching documents only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: BTreeMap<String, FieldCondition>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, field: &str, value: impl Into<Scalar>) -> Self {
        self.conditions
            .insert(field.to_string(), FieldCondition::Eq(value.into()));
        self
    }

    #[must_use]
    pub fn ne(mut self, field: &str, value: impl Into<Scalar>) -> Self {
        self.conditions
            .insert(field.to_string(), FieldCondition::Ne(value.into()));
        self
    }

    #[must_use]
    pub fn is_in(mut self, field: &str, values: Vec<Scalar>) -> Self {
        self.conditions
            .insert(field.to_string(), FieldCondition::In(values));
        self
    }

    #[must_use]
    pub fn range(
        mut self,
        field: &str,
        gte: Option<f64>,
        lte: Option<f64>,
        gt: Option<f64>,
        lt: Option<f64>,
    ) -> Self {
        self.conditions
            .insert(field.to_string(), FieldCondition::Range { gte, lte, gt, lt });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether `payload` satisfies every condition. Missing fields fail.
    #[must_use]
    pub fn matches(&self, payload: &BTreeMap<String, Scalar>) -> bool {
        self.conditions.iter().all(|(field, condition)| {
            payload
                .get(field)
                .map(|value| condition.matches(value))
                .unwrap_or(false)
        })
    }

    /// Deterministic byte form used in query-cache keys. `BTreeMap`
    /// ordering makes this stable across processes.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl Scalar {
    /// Convert a JSON scalar. `None` for arrays, objects and nulls.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Scalar::Integer(i))
                } else {
                    n.as_f64().map(Scalar::Float)
                }
            }
            serde_json::Value::String(s) => Some(Scalar::String(s.clone())),
            _ => None,
        }
    }
}

/// Convert a JSON object into a scalar payload map. `None` when the value
/// is not an object or any field is not a scalar.
#[must_use]
pub fn payload_from_json(value: &serde_json::Value) -> Option<BTreeMap<String, Scalar>> {
    let map = value.as_object()?;
    let mut out = BTreeMap::new();
    for (field, value) in map {
        out.insert(field.clone(), Scalar::from_json(value)?);
    }
    Some(out)
}

/// Cosine similarity of two equal-length vectors; zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
