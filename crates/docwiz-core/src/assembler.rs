//! Result Assembler (spec §4.9): combines per-chunk LLM outputs into one
//! artifact and persists a new versioned result.

use crate::chunking::PlannedCall;
use crate::result::ResultRecord;
use crate::session::SessionId;

/// Per-call output paired with the call that produced it, so the assembler
/// can tell a per-file call apart from a per-chunk-within-a-file call.
pub struct CallOutput {
    pub call: PlannedCall,
    pub text: String,
}

/// Combines chunk outputs per spec §4.9's two concatenation shapes.
pub fn combine(outputs: &[CallOutput]) -> String {
    if outputs.is_empty() {
        return String::new();
    }

    // A single call (whether GLOBAL-single or a targeted prompt) has no
    // heading wrapper at all: its text *is* the result.
    if outputs.len() == 1 && outputs[0].call.file_name.is_none() {
        return outputs[0].text.clone();
    }

    // Group consecutive outputs by file. A file present via sub-chunking
    // assembles its "### Část {n}" blocks first, then those per-file blocks
    // join with the "## {filename}" wrapper.
    let mut per_file: Vec<(Option<String>, Vec<&CallOutput>)> = Vec::new();
    for output in outputs {
        match per_file.last_mut() {
            Some((name, group)) if *name == output.call.file_name => group.push(output),
            _ => per_file.push((output.call.file_name.clone(), vec![output])),
        }
    }

    per_file
        .into_iter()
        .map(|(name, group)| {
            let body = if group.len() == 1 && group[0].call.chunk_index.is_none() {
                group[0].text.clone()
            } else {
                group
                    .iter()
                    .enumerate()
                    .map(|(i, o)| format!("### Část {}\n\n{}", o.call.chunk_index.unwrap_or(i + 1), o.text))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            };
            match name {
                Some(filename) => format!("## {filename}\n\n{body}"),
                None => body,
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Persists a new `ResultRecord` at `max(existing_versions) + 1` (spec §4.9).
pub fn next_version(existing: &[ResultRecord]) -> u32 {
    existing.iter().map(|r| r.version).max().unwrap_or(0) + 1
}

/// Joins each completed prompt's own (already chunk-combined) result text
/// in `(priority, executionOrder)` order. A session with a single prompt
/// yields that prompt's text verbatim, matching the single-GLOBAL-prompt
/// worked scenario in spec §8.
pub fn combine_prompt_results(results: &[String]) -> String {
    results.join("\n\n---\n\n")
}

pub fn assemble_from_content(
    session_id: SessionId,
    existing: &[ResultRecord],
    content: String,
    prompt_count: usize,
) -> ResultRecord {
    let version = next_version(existing);
    ResultRecord::new(session_id, version, content, prompt_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn call(file_name: Option<&str>, chunk_index: Option<usize>) -> PlannedCall {
        PlannedCall {
            file_id: None,
            file_name: file_name.map(String::from),
            chunk_index,
            content: String::new(),
        }
    }

    #[test]
    fn single_call_has_no_heading() {
        let outputs = vec![CallOutput {
            call: call(None, None),
            text: "summary text".into(),
        }];
        assert_eq!(combine(&outputs), "summary text");
    }

    #[test]
    fn per_file_plan_wraps_with_filename_headings() {
        let outputs = vec![
            CallOutput {
                call: call(Some("a.docx"), None),
                text: "output a".into(),
            },
            CallOutput {
                call: call(Some("b.docx"), None),
                text: "output b".into(),
            },
        ];
        let combined = combine(&outputs);
        assert_eq!(
            combined,
            "## a.docx\n\noutput a\n\n---\n\n## b.docx\n\noutput b"
        );
    }

    #[test]
    fn per_chunk_within_file_uses_cast_headings() {
        let outputs = vec![
            CallOutput {
                call: call(Some("big.docx"), Some(1)),
                text: "part one".into(),
            },
            CallOutput {
                call: call(Some("big.docx"), Some(2)),
                text: "part two".into(),
            },
        ];
        let combined = combine(&outputs);
        assert_eq!(
            combined,
            "## big.docx\n\n### Část 1\n\npart one\n\n### Část 2\n\npart two"
        );
    }

    #[test]
    fn next_version_starts_at_one() {
        assert_eq!(next_version(&[]), 1);
    }

    #[test]
    fn next_version_increments_from_max_existing() {
        let session_id = Uuid::new_v4();
        let existing = vec![
            ResultRecord::new(session_id, 1, "a".into(), 1),
            ResultRecord::new(session_id, 3, "b".into(), 1),
        ];
        assert_eq!(next_version(&existing), 4);
    }
}
