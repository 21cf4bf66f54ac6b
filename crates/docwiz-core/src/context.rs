//! Context Builder (spec §4.5 steps 1-2): resolves a prompt's targeted
//! content and the ordered "previous results" context it carries.

use crate::error::{EngineError, EngineResult};
use crate::file::File;
use crate::prompt::{Prompt, PromptStatus, TargetType};

/// Targeted content resolved for one prompt, before chunking.
pub enum TargetedContent {
    /// GLOBAL: every file, handed to the Chunking Planner as-is.
    AllFiles(Vec<File>),
    /// FILE_SPECIFIC/LINE_SPECIFIC/SECTION_SPECIFIC: one file's isolated slice.
    Single { file: File, text: String },
}

/// Resolves spec §6's targeting contract against a session's files.
pub fn resolve_target(prompt: &Prompt, files: &[File]) -> EngineResult<TargetedContent> {
    match prompt.target_type {
        TargetType::Global => Ok(TargetedContent::AllFiles(files.to_vec())),
        TargetType::FileSpecific => {
            let file_id = prompt
                .target_file_id
                .ok_or_else(|| EngineError::Validation("FILE_SPECIFIC prompt missing target_file_id".into()))?;
            let file = find_file(files, file_id)?;
            let text = file.plain_text.clone();
            Ok(TargetedContent::Single { file, text })
        }
        TargetType::LineSpecific => {
            let file_id = prompt
                .target_file_id
                .ok_or_else(|| EngineError::Validation("LINE_SPECIFIC prompt missing target_file_id".into()))?;
            let range = prompt
                .target_lines
                .ok_or_else(|| EngineError::Validation("LINE_SPECIFIC prompt missing target_lines".into()))?;
            let file = find_file(files, file_id)?;
            let text = file.lines_range(range.start, range.end);
            Ok(TargetedContent::Single { file, text })
        }
        TargetType::SectionSpecific => {
            let needle = prompt
                .target_section
                .as_deref()
                .ok_or_else(|| EngineError::Validation("SECTION_SPECIFIC prompt missing target_section".into()))?;
            // "first file containing a section whose title contains the string" (spec §6).
            let (file, section_content) = files
                .iter()
                .find_map(|f| f.find_section(needle).map(|s| (f.clone(), s.content.clone())))
                .ok_or_else(|| {
                    EngineError::Processing(format!("no section matching '{needle}' found in any file"))
                })?;
            Ok(TargetedContent::Single {
                file,
                text: section_content,
            })
        }
    }
}

fn find_file(files: &[File], id: crate::file::FileId) -> EngineResult<File> {
    files
        .iter()
        .find(|f| f.id == id)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("file {id} not found in session")))
}

/// `previousResults` per spec §4.5 step 2 / §8 testable property 4: the
/// `result` fields of all COMPLETED prompts in the same session with lower
/// priority than `current`, ordered ascending by priority.
pub fn previous_results(current: &Prompt, all_prompts: &[Prompt]) -> Vec<String> {
    let mut lower: Vec<&Prompt> = all_prompts
        .iter()
        .filter(|p| {
            p.status == PromptStatus::Completed
                && p.priority < current.priority
                && p.result.is_some()
        })
        .collect();
    lower.sort_by_key(|p| (p.priority, p.execution_order));
    lower
        .into_iter()
        .filter_map(|p| p.result.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{build_batch, PromptInput, LineRange};
    use uuid::Uuid;

    fn input(priority: i32) -> PromptInput {
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
    fn previous_results_orders_by_priority_ascending() {
        let session_id = Uuid::new_v4();
        let mut prompts = build_batch(session_id, vec![input(2), input(1)]).unwrap();
        for p in prompts.iter_mut() {
            p.status = PromptStatus::Completed;
            p.result = Some(format!("result for priority {}", p.priority));
        }
        let current = {
            let mut c = prompts[0].clone();
            c.priority = 3;
            c
        };
        let results = previous_results(&current, &prompts);
        assert_eq!(results.len(), 2);
        assert!(results[0].contains("priority 1"));
        assert!(results[1].contains("priority 2"));
    }

    #[test]
    fn line_specific_extracts_inclusive_one_indexed_range() {
        let session_id = Uuid::new_v4();
        let file = File::new(session_id, "f.txt", "text/plain", "a\nb\nc\nd", vec![], vec![]);
        let mut prompt_input = input(1);
        prompt_input.target_type = TargetType::LineSpecific;
        prompt_input.target_file_id = Some(file.id);
        prompt_input.target_lines = Some(LineRange { start: 2, end: 3 });
        let prompts = build_batch(session_id, vec![prompt_input]).unwrap();

        let resolved = resolve_target(&prompts[0], &[file]).unwrap();
        match resolved {
            TargetedContent::Single { text, .. } => assert_eq!(text, "b\nc"),
            _ => panic!("expected Single"),
        }
    }
}
