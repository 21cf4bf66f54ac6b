//! Normalizes the different shapes a provider's raw completion payload can
//! arrive in — a plain string, an array of chunks, or an object keyed by
//! stringified integer indices — into a single `String`.
//!
//! Per the design note on "dynamic response shapes", this is expressed as
//! one sum type with one normalization routine so downstream code (the
//! Gateway, the Executor) only ever sees a `String`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::LLMError;

/// A provider's raw completion payload before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCompletion {
    Text(String),
    Chunks(Vec<String>),
    IndexedChunks(BTreeMap<String, String>),
}

impl RawCompletion {
    /// Concatenates the payload into a single string.
    ///
    /// `IndexedChunks` keys are parsed as integers and sorted numerically
    /// (a `BTreeMap<String, _>` sorts lexicographically, which misorders
    /// "10" before "2"), then joined in that order. An empty result after
    /// normalization is an error per the gateway contract.
    pub fn normalize(self) -> Result<String, LLMError> {
        let combined = match self {
            RawCompletion::Text(s) => s,
            RawCompletion::Chunks(parts) => parts.concat(),
            RawCompletion::IndexedChunks(map) => {
                let mut entries: Vec<(u64, String)> = map
                    .into_iter()
                    .map(|(k, v)| {
                        let idx = k.parse::<u64>().map_err(|_| {
                            LLMError::ResponseFormatError {
                                message: format!("non-numeric chunk key: {k}"),
                                raw_response: k.clone(),
                            }
                        })?;
                        Ok::<_, LLMError>((idx, v))
                    })
                    .collect::<Result<_, _>>()?;
                entries.sort_by_key(|(idx, _)| *idx);
                entries.into_iter().map(|(_, v)| v).collect()
            }
        };

        if combined.is_empty() {
            return Err(LLMError::ResponseFormatError {
                message: "completion content is empty after normalization".into(),
                raw_response: String::new(),
            });
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_string() {
        let raw: RawCompletion = serde_json::from_str("\"abcd\"").unwrap();
        assert_eq!(raw.normalize().unwrap(), "abcd");
    }

    #[test]
    fn normalizes_array_of_chunks() {
        let raw: RawCompletion = serde_json::from_str(r#"["ab","cd"]"#).unwrap();
        assert_eq!(raw.normalize().unwrap(), "abcd");
    }

    #[test]
    fn normalizes_integer_keyed_object_in_numeric_order() {
        let raw: RawCompletion = serde_json::from_str(r#"{"0":"abc","1":"de"}"#).unwrap();
        assert_eq!(raw.normalize().unwrap(), "abcde");
    }

    #[test]
    fn normalizes_integer_keyed_object_past_single_digit() {
        let raw: RawCompletion =
            serde_json::from_str(r#"{"10":"z","2":"y","1":"x"}"#).unwrap();
        assert_eq!(raw.normalize().unwrap(), "xyz");
    }

    #[test]
    fn empty_result_is_an_error() {
        let raw: RawCompletion = serde_json::from_str("\"\"").unwrap();
        assert!(raw.normalize().is_err());
    }

    #[test]
    fn all_three_shapes_agree() {
        let a: RawCompletion = serde_json::from_str(r#"{"0":"abc","1":"de"}"#).unwrap();
        let b: RawCompletion = serde_json::from_str(r#"["ab","cd"]"#).unwrap();
        let c: RawCompletion = serde_json::from_str("\"abcd\"").unwrap();
        assert_eq!(a.normalize().unwrap(), "abcd");
        assert_eq!(b.normalize().unwrap(), "abcd");
        assert_eq!(c.normalize().unwrap(), "abcd");
    }
}
