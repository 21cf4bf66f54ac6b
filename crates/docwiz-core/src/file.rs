//! File entity (spec §3). Extraction itself is an external collaborator —
//! this module only models the `(plain_text, section_list, table_list,
//! metadata)` shape the engine consumes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionId;

pub type FileId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub level: u32,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub markdown: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// An uploaded, already-parsed document. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub session_id: SessionId,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub plain_text: String,
    pub sections: Vec<Section>,
    pub tables: Vec<Table>,
    /// `ceil(chars/4)` unless a more precise estimate was supplied by an
    /// external estimator (spec §1: "advisory" only).
    pub token_estimate: u32,
}

impl File {
    pub fn new(
        session_id: SessionId,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        plain_text: impl Into<String>,
        sections: Vec<Section>,
        tables: Vec<Table>,
    ) -> Self {
        let plain_text = plain_text.into();
        let size = plain_text.len() as u64;
        let token_estimate = crate::chunking::estimate_tokens(&plain_text);
        Self {
            id: Uuid::new_v4(),
            session_id,
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size,
            plain_text,
            sections,
            tables,
            token_estimate,
        }
    }

    /// First section whose title contains `needle`, case-insensitively
    /// (spec §6 targeting contract, SECTION_SPECIFIC).
    pub fn find_section(&self, needle: &str) -> Option<&Section> {
        let needle = needle.to_lowercase();
        self.sections
            .iter()
            .find(|s| s.title.to_lowercase().contains(&needle))
    }

    /// 1-indexed, inclusive line range extraction.
    pub fn lines_range(&self, start: usize, end: usize) -> String {
        self.plain_text
            .lines()
            .enumerate()
            .filter(|(i, _)| {
                let line_no = i + 1;
                line_no >= start && line_no <= end
            })
            .map(|(_, l)| l)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
