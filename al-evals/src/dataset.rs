//! Golden dataset model: `{dataset_name, version, test_cases}` JSON files.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    #[diagnostic(code(al_evals::dataset::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset {path}: {source}")]
    #[diagnostic(code(al_evals::dataset::parse))]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// One golden case. The input/expected schemas are agent-specific; graders
/// know how to read them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub difficulty: Difficulty,
    pub input: Value,
    pub expected: Value,
}

/// An ordered collection of golden cases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_name: String,
    pub version: String,
    pub test_cases: Vec<TestCase>,
}

impl Dataset {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| DatasetError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dataset_round_trips_through_json() {
        let dataset = Dataset {
            dataset_name: "invoice_matches".into(),
            version: "1.0".into(),
            test_cases: vec![TestCase {
                id: "easy_exact".into(),
                difficulty: Difficulty::Easy,
                input: json!({"transaction": {}}),
                expected: json!({"matched": true}),
            }],
        };
        let raw = serde_json::to_string(&dataset).unwrap();
        let back: Dataset = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.dataset_name, "invoice_matches");
        assert_eq!(back.test_cases[0].difficulty, Difficulty::Easy);
    }

    #[test]
    fn load_reads_files_and_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        std::fs::write(
            &path,
            r#"{"dataset_name": "d", "version": "1", "test_cases": []}"#,
        )
        .unwrap();
        let dataset = Dataset::load(&path).unwrap();
        assert!(dataset.is_empty());

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Dataset::load(&path),
            Err(DatasetError::Parse { .. })
        ));
        assert!(matches!(
            Dataset::load(dir.path().join("absent.json")),
            Err(DatasetError::Io { .. })
        ));
    }
}
