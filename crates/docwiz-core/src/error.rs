//! Engine-wide error taxonomy (spec §7).

use thiserror::Error;

/// Errors surfaced by the prompt processing engine.
///
/// Maps onto spec §7's four categories: validation errors never change
/// state, resource errors leave session status untouched (unless already
/// EXPIRED), processing errors mark the owning prompt/session FAILED, and
/// storage errors degrade to durable-only writes where possible.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<docwiz_llm::LLMError> for EngineError {
    fn from(err: docwiz_llm::LLMError) -> Self {
        match err {
            docwiz_llm::LLMError::ModelUnavailable(m) => EngineError::ModelUnavailable(m),
            other => EngineError::Processing(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Wire-level `{success, data|error}` shape from spec §7.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum ApiResult<T> {
    Ok { success: bool, data: T },
    Err { success: bool, error: String },
}

impl<T> ApiResult<T> {
    pub fn ok(data: T) -> Self {
        ApiResult::Ok {
            success: true,
            data,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ApiResult::Err {
            success: false,
            error: message.into(),
        }
    }

    pub fn from_result(result: EngineResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}
