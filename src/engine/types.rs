use crate::config::PassOptions;
use serde::{Deserialize, Serialize};

/// Which pipeline configuration a conversion runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertMode {
    /// No table structure, no picture rendering, no OCR.
    Cheap,
    /// Table structure inference and per-picture image rendering.
    HighFidelity,
    /// Engine defaults; used for non-PDF input.
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub python_exe: String,
    pub python_version: String,
    pub docling_version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    /// 1-based.
    pub page_no: u32,
    #[serde(default)]
    pub markdown: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableItem {
    /// Provenance page, 1-based. Absent when the engine has no provenance.
    #[serde(default)]
    pub page_no: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PictureItem {
    #[serde(default)]
    pub page_no: Option<u32>,
    /// PNG bytes, base64. Only rendered when picture images are enabled.
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub ocr_text: Option<String>,
}

/// Read-only view of the engine's document model.
///
/// `None` collections mean the engine did not report them at all, which is
/// different from reporting an empty list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertedDocument {
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub pages: Option<Vec<PageItem>>,
    #[serde(default)]
    pub tables: Option<Vec<TableItem>>,
    #[serde(default)]
    pub pictures: Option<Vec<PictureItem>>,
}

impl ConvertedDocument {
    pub fn export_to_markdown(&self) -> &str {
        &self.markdown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamIn {
    pub name: String,
    pub base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertIn {
    pub cmd: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub streams: Vec<StreamIn>,
    pub options: PassOptions,
    pub num_threads: u32,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOut {
    pub ok: bool,
    #[serde(default)]
    pub document: Option<ConvertedDocument>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertStreamsOut {
    pub ok: bool,
    #[serde(default)]
    pub documents: Vec<Option<ConvertedDocument>>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}
