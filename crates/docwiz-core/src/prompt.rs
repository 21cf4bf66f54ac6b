//! Prompt entity, targeting spec, and batch validation (spec §3, §4.2, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::file::FileId;
use crate::session::SessionId;

pub type PromptId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    Global,
    FileSpecific,
    LineSpecific,
    SectionSpecific,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

/// Caller-supplied input before `execution_order`/`status` are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInput {
    pub content: String,
    pub priority: i32,
    pub target_type: TargetType,
    pub target_file_id: Option<FileId>,
    pub target_lines: Option<LineRange>,
    pub target_section: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub session_id: SessionId,
    pub content: String,
    pub priority: i32,
    pub target_type: TargetType,
    pub target_file_id: Option<FileId>,
    pub target_lines: Option<LineRange>,
    pub target_section: Option<String>,
    pub status: PromptStatus,
    /// Tie-breaker within equal priority, assigned at enqueue time.
    pub execution_order: u32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Validates the targeting contract from spec §6.
pub fn validate_targeting(input: &PromptInput) -> EngineResult<()> {
    match input.target_type {
        TargetType::Global => Ok(()),
        TargetType::FileSpecific => {
            if input.target_file_id.is_none() {
                return Err(EngineError::Validation(
                    "FILE_SPECIFIC prompt requires target_file_id".into(),
                ));
            }
            Ok(())
        }
        TargetType::LineSpecific => {
            let file_ok = input.target_file_id.is_some();
            let range_ok = match input.target_lines {
                Some(r) => r.start >= 1 && r.end >= r.start,
                None => false,
            };
            if !file_ok || !range_ok {
                return Err(EngineError::Validation(
                    "LINE_SPECIFIC prompt requires target_file_id and target_lines with 1 <= start <= end"
                        .into(),
                ));
            }
            Ok(())
        }
        TargetType::SectionSpecific => {
            if input
                .target_section
                .as_ref()
                .map(|s| s.is_empty())
                .unwrap_or(true)
            {
                return Err(EngineError::Validation(
                    "SECTION_SPECIFIC prompt requires target_section".into(),
                ));
            }
            Ok(())
        }
    }
}

/// Validates and orders a batch of prompt inputs into ready-to-persist
/// `Prompt` rows. Sorts by `(priority ascending, submission order ascending)`
/// and assigns a 1-based `execution_order`. Fails the whole batch atomically
/// on any validation error (spec §4.2).
pub fn build_batch(session_id: SessionId, inputs: Vec<PromptInput>) -> EngineResult<Vec<Prompt>> {
    for input in &inputs {
        validate_targeting(input)?;
    }

    let mut indexed: Vec<(usize, PromptInput)> = inputs.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ia.cmp(ib)));

    let now = Utc::now();
    Ok(indexed
        .into_iter()
        .enumerate()
        .map(|(order_idx, (_, input))| Prompt {
            id: Uuid::new_v4(),
            session_id,
            content: input.content,
            priority: input.priority,
            target_type: input.target_type,
            target_file_id: input.target_file_id,
            target_lines: input.target_lines,
            target_section: input.target_section,
            status: PromptStatus::Pending,
            execution_order: (order_idx + 1) as u32,
            result: None,
            error: None,
            skip_reason: None,
            created_at: now,
            completed_at: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(priority: i32) -> PromptInput {
        PromptInput {
            content: "do it".into(),
            priority,
            target_type: TargetType::Global,
            target_file_id: None,
            target_lines: None,
            target_section: None,
        }
    }

    #[test]
    fn line_specific_requires_file_and_valid_range() {
        let mut input = global(1);
        input.target_type = TargetType::LineSpecific;
        assert!(validate_targeting(&input).is_err());

        input.target_file_id = Some(Uuid::new_v4());
        input.target_lines = Some(LineRange { start: 5, end: 2 });
        assert!(validate_targeting(&input).is_err());

        input.target_lines = Some(LineRange { start: 2, end: 5 });
        assert!(validate_targeting(&input).is_ok());
    }

    #[test]
    fn batch_orders_by_priority_then_submission_order() {
        let session_id = Uuid::new_v4();
        let inputs = vec![global(2), global(1), global(1)];
        let prompts = build_batch(session_id, inputs).unwrap();

        // priority 1 (submitted 2nd) first, priority 1 (submitted 3rd) second,
        // priority 2 (submitted 1st) last.
        assert_eq!(prompts[0].priority, 1);
        assert_eq!(prompts[0].execution_order, 1);
        assert_eq!(prompts[1].priority, 1);
        assert_eq!(prompts[1].execution_order, 2);
        assert_eq!(prompts[2].priority, 2);
        assert_eq!(prompts[2].execution_order, 3);
    }

    #[test]
    fn batch_fails_atomically_on_one_bad_targeting() {
        let session_id = Uuid::new_v4();
        let mut bad = global(1);
        bad.target_type = TargetType::FileSpecific;
        let inputs = vec![global(1), bad];
        assert!(build_batch(session_id, inputs).is_err());
    }
}
