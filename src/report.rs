use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An image pulled out of the high-fidelity pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    /// 1-based page in the source document.
    pub page_number: u32,
    pub base64: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub page_count: usize,
    pub fast_pages: usize,
    pub complex_pages: usize,
    pub images_found: usize,
    pub tables_found: usize,
    pub total_text_length: usize,
    pub processing_time: f64,
    pub easy_mode_time: f64,
    pub triage_time: f64,
    pub complex_mode_time: f64,
    pub merge_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_name: String,
    pub file_size: u64,
}

/// Everything the processor learned about one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub markdown: String,
    /// 0-based page index to markdown; `None` for non-PDF input.
    pub page_markdown: Option<BTreeMap<usize, String>>,
    pub total_pages: usize,
    pub images: Vec<ImageRecord>,
    pub tables: Vec<TableRecord>,
    pub metadata: ProcessingMetadata,
    pub file: FileInfo,
}
