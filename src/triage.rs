//! Per-page complexity labels from the cheap conversion pass.

use crate::engine::ConvertedDocument;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageComplexity {
    Simple,
    Table,
    Image,
    #[serde(rename = "table+image")]
    TableImage,
}

impl PageComplexity {
    fn with_table(self) -> Self {
        match self {
            Self::Simple => Self::Table,
            Self::Image => Self::TableImage,
            other => other,
        }
    }

    fn with_image(self) -> Self {
        match self {
            Self::Simple => Self::Image,
            Self::Table => Self::TableImage,
            other => other,
        }
    }

    pub fn is_complex(self) -> bool {
        self != Self::Simple
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    /// 0-based page indices.
    pub simple_pages: Vec<usize>,
    pub complex_pages: Vec<usize>,
    pub labels: Vec<PageComplexity>,
}

/// Provenance page for an element, 1-based, defaulting to page 1.
pub fn provenance_page(page_no: Option<u32>) -> u32 {
    page_no.unwrap_or(1)
}

fn clamp_index(page_no: Option<u32>, total_pages: usize) -> usize {
    let page = provenance_page(page_no) as usize;
    page.saturating_sub(1).min(total_pages - 1)
}

/// Labels every page and splits them into simple and complex sets.
///
/// A missing document, or one with no table and picture collections, leaves
/// every page simple.
pub fn analyze_and_triage_pages(
    doc: Option<&ConvertedDocument>,
    total_pages: usize,
) -> TriageResult {
    let mut labels = vec![PageComplexity::Simple; total_pages];

    if let Some(doc) = doc.filter(|_| total_pages > 0) {
        for table in doc.tables.iter().flatten() {
            let idx = clamp_index(table.page_no, total_pages);
            labels[idx] = labels[idx].with_table();
        }
        for picture in doc.pictures.iter().flatten() {
            let idx = clamp_index(picture.page_no, total_pages);
            labels[idx] = labels[idx].with_image();
        }
    }

    let (complex_pages, simple_pages): (Vec<usize>, Vec<usize>) =
        (0..total_pages).partition(|&i| labels[i].is_complex());

    TriageResult {
        simple_pages,
        complex_pages,
        labels,
    }
}
