//! Single-page PDF streams for isolated re-processing.

use anyhow::{Context, Result};
use lopdf::Document;
use std::path::Path;
use tracing::{debug, error};

/// One page cut out of a source PDF, held in memory.
#[derive(Debug, Clone)]
pub struct PageStream {
    /// 0-based index of the page in the source document.
    pub index: usize,
    pub name: String,
    pub bytes: Vec<u8>,
}

pub fn page_count(path: &Path) -> Result<usize> {
    let doc = Document::load(path).with_context(|| format!("loading PDF: {}", path.display()))?;
    Ok(doc.get_pages().len())
}

/// Cuts the requested 0-based pages out of `path`.
///
/// Indices past the end of the document are skipped. Any failure drops the
/// whole batch and yields an empty list.
pub fn extract_pages_to_memory(path: &Path, page_indices: &[usize]) -> Vec<PageStream> {
    match try_extract(path, page_indices) {
        Ok(streams) => streams,
        Err(err) => {
            error!("extracting pages to memory failed: {err:#}");
            Vec::new()
        }
    }
}

fn try_extract(path: &Path, page_indices: &[usize]) -> Result<Vec<PageStream>> {
    let source = Document::load(path).with_context(|| format!("loading PDF: {}", path.display()))?;
    let all_pages: Vec<u32> = source.get_pages().keys().copied().collect();

    let mut streams = Vec::with_capacity(page_indices.len());
    for &index in page_indices {
        if index >= all_pages.len() {
            debug!("page index {index} beyond page count {}", all_pages.len());
            continue;
        }
        let keep = all_pages[index];
        let mut single = source.clone();
        let drop: Vec<u32> = all_pages.iter().copied().filter(|&p| p != keep).collect();
        single.delete_pages(&drop);
        single.prune_objects();

        let mut bytes = Vec::new();
        single
            .save_to(&mut bytes)
            .with_context(|| format!("serializing page {}", index + 1))?;
        streams.push(PageStream {
            index,
            name: format!("page_{}.pdf", index + 1),
            bytes,
        });
    }
    Ok(streams)
}
