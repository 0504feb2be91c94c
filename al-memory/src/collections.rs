//! Collection registry and payload schema validation.
//!
//! Four collections, each with a declared payload schema. Writes carrying
//! unknown fields, type-mismatched values, unparsable dates, or field
//! values over 64 KiB are rejected with a schema violation.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};

use crate::error::MemoryError;
use crate::types::Scalar;

/// Hard cap on a single payload field value.
pub const MAX_FIELD_BYTES: usize = 64 * 1024;

/// The collections this platform defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionName {
    /// Invoice content for semantic matching against bank transactions.
    Invoices,
    /// Social media post history for duplicate avoidance.
    SocialPosts,
    /// Ad performance snapshots for trend analysis.
    AdReports,
    /// Agent decision context for learning from past runs.
    AgentContext,
}

impl CollectionName {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Invoices => "invoices",
            CollectionName::SocialPosts => "social_posts",
            CollectionName::AdReports => "ad_reports",
            CollectionName::AgentContext => "agent_context",
        }
    }

    pub fn parse(name: &str) -> Result<Self, MemoryError> {
        match name {
            "invoices" => Ok(CollectionName::Invoices),
            "social_posts" => Ok(CollectionName::SocialPosts),
            "ad_reports" => Ok(CollectionName::AdReports),
            "agent_context" => Ok(CollectionName::AgentContext),
            other => Err(MemoryError::UnknownCollection {
                name: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn all() -> [CollectionName; 4] {
        [
            CollectionName::Invoices,
            CollectionName::SocialPosts,
            CollectionName::AdReports,
            CollectionName::AgentContext,
        ]
    }

    /// Declared vector dimension. All platform collections embed with the
    /// same model, so they share one dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        crate::embedder::EMBEDDING_DIM
    }

    #[must_use]
    pub fn schema(&self) -> &'static CollectionSchema {
        schema(*self)
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Bool,
    /// ISO-8601: either a plain date (`2025-01-03`) or an RFC3339 timestamp.
    Date,
}

/// Payload schema of one collection.
#[derive(Debug)]
pub struct CollectionSchema {
    pub fields: &'static [(&'static str, FieldType)],
}

impl CollectionSchema {
    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, ty)| *ty)
    }
}

static INVOICES: CollectionSchema = CollectionSchema {
    fields: &[
        ("invoice_id", FieldType::Integer),
        ("vendor_name", FieldType::String),
        ("amount", FieldType::Float),
        ("date", FieldType::Date),
        ("description", FieldType::String),
        ("file_path", FieldType::String),
        ("matched", FieldType::Bool),
        ("created_at", FieldType::Date),
    ],
};

static SOCIAL_POSTS: CollectionSchema = CollectionSchema {
    fields: &[
        ("post_id", FieldType::String),
        ("brand", FieldType::String),
        ("platform", FieldType::String),
        ("caption_text", FieldType::String),
        ("caption_language", FieldType::String),
        ("quality_score", FieldType::Float),
        ("engagement_rate", FieldType::Float),
        ("published", FieldType::Bool),
        ("published_at", FieldType::Date),
        ("facebook_post_id", FieldType::String),
        ("instagram_post_id", FieldType::String),
        ("photo_key", FieldType::String),
        ("created_at", FieldType::Date),
    ],
};

static AD_REPORTS: CollectionSchema = CollectionSchema {
    fields: &[
        ("campaign_id", FieldType::String),
        ("campaign_name", FieldType::String),
        ("date", FieldType::Date),
        ("spend", FieldType::Float),
        ("conversions", FieldType::Integer),
        ("roas", FieldType::Float),
        ("insights", FieldType::String),
        ("created_at", FieldType::Date),
    ],
};

static AGENT_CONTEXT: CollectionSchema = CollectionSchema {
    fields: &[
        ("agent_name", FieldType::String),
        ("context_type", FieldType::String),
        ("confidence", FieldType::Float),
        ("transaction_id", FieldType::String),
        ("invoice_id", FieldType::Integer),
        ("created_at", FieldType::Date),
    ],
};

#[must_use]
pub fn schema(name: CollectionName) -> &'static CollectionSchema {
    match name {
        CollectionName::Invoices => &INVOICES,
        CollectionName::SocialPosts => &SOCIAL_POSTS,
        CollectionName::AdReports => &AD_REPORTS,
        CollectionName::AgentContext => &AGENT_CONTEXT,
    }
}

/// Validate a full payload (or a partial metadata update) against the
/// collection schema.
pub fn validate_payload(
    collection: CollectionName,
    payload: &BTreeMap<String, Scalar>,
) -> Result<(), MemoryError> {
    let schema = schema(collection);
    for (field, value) in payload {
        let Some(expected) = schema.field_type(field) else {
            return Err(MemoryError::SchemaViolation {
                detail: format!("unknown field {field:?} for collection {collection}"),
            });
        };
        if value.byte_len() > MAX_FIELD_BYTES {
            return Err(MemoryError::SchemaViolation {
                detail: format!(
                    "field {field:?} exceeds {MAX_FIELD_BYTES} bytes ({})",
                    value.byte_len()
                ),
            });
        }
        let ok = match (expected, value) {
            (FieldType::String, Scalar::String(_)) => true,
            (FieldType::Integer, Scalar::Integer(_)) => true,
            (FieldType::Float, Scalar::Float(_) | Scalar::Integer(_)) => true,
            (FieldType::Bool, Scalar::Bool(_)) => true,
            (FieldType::Date, Scalar::String(raw)) => is_iso_date(raw),
            _ => false,
        };
        if !ok {
            return Err(MemoryError::SchemaViolation {
                detail: format!(
                    "field {field:?} of {collection} expects {expected:?}, got {value:?}"
                ),
            });
        }
    }
    Ok(())
}

fn is_iso_date(raw: &str) -> bool {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, Scalar)]) -> BTreeMap<String, Scalar> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_invoice_payload_passes() {
        let p = payload(&[
            ("invoice_id", Scalar::Integer(12)),
            ("vendor_name", Scalar::from("SNCB")),
            ("amount", Scalar::Float(22.70)),
            ("date", Scalar::from("2025-01-03")),
            ("matched", Scalar::Bool(false)),
            ("created_at", Scalar::from("2025-01-03T10:00:00+00:00")),
        ]);
        validate_payload(CollectionName::Invoices, &p).unwrap();
    }

    #[test]
    fn unknown_field_is_rejected() {
        let p = payload(&[("vendor", Scalar::from("SNCB"))]);
        let err = validate_payload(CollectionName::Invoices, &p).unwrap_err();
        assert!(matches!(err, MemoryError::SchemaViolation { .. }));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let p = payload(&[("amount", Scalar::from("22.70"))]);
        assert!(validate_payload(CollectionName::Invoices, &p).is_err());
    }

    #[test]
    fn bad_date_is_rejected() {
        let p = payload(&[("date", Scalar::from("03/01/2025"))]);
        assert!(validate_payload(CollectionName::Invoices, &p).is_err());
    }

    #[test]
    fn integers_widen_into_float_fields() {
        let p = payload(&[("amount", Scalar::Integer(23))]);
        validate_payload(CollectionName::Invoices, &p).unwrap();
    }

    #[test]
    fn oversized_field_is_rejected() {
        let p = payload(&[(
            "description",
            Scalar::String("x".repeat(MAX_FIELD_BYTES + 1)),
        )]);
        assert!(validate_payload(CollectionName::Invoices, &p).is_err());
    }

    #[test]
    fn collection_names_round_trip() {
        for name in CollectionName::all() {
            assert_eq!(CollectionName::parse(name.as_str()).unwrap(), name);
        }
        assert!(CollectionName::parse("nope").is_err());
    }
}
