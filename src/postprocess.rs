use crate::config::Config;
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

/// Cheap-pass pages overridden by high-fidelity results on complex pages.
pub fn merge_processing_results(
    easy: &BTreeMap<usize, String>,
    complex: &BTreeMap<usize, String>,
    complex_pages: &[usize],
) -> BTreeMap<usize, String> {
    let mut merged = easy.clone();
    for page in complex_pages {
        if let Some(md) = complex.get(page) {
            merged.insert(*page, md.clone());
        }
    }
    merged
}

/// Joins non-blank pages in page order with `separator`.
pub fn merge_markdown_by_page(
    page_markdown: &BTreeMap<usize, String>,
    total_pages: usize,
    separator: &str,
) -> String {
    let parts: Vec<&str> = (0..total_pages)
        .filter_map(|page| page_markdown.get(&page).map(|s| s.trim()))
        .filter(|content| !content.is_empty())
        .collect();
    parts.join(&format!("\n{separator}\n")).trim().to_string()
}

/// Normalizes one page of engine markdown.
pub fn clean_page(cfg: &Config, md: &str) -> String {
    let mut out = md.to_string();

    if cfg.postprocess.normalize_newlines {
        out = out.replace("\r\n", "\n");
    }

    if cfg.postprocess.normalize_unicode {
        out = out.nfkc().collect::<String>();
    }

    if cfg.postprocess.trim_trailing_whitespace {
        out = out
            .lines()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n");
    }

    out
}

/// Per-page stub used when a conversion pass fails.
pub fn fallback_page(page_index: usize, reason: &str) -> String {
    format!("# Page {}\n\n[{}]", page_index + 1, reason)
}

pub fn fallback_pages(page_indices: &[usize], reason: &str) -> BTreeMap<usize, String> {
    page_indices
        .iter()
        .map(|&p| (p, fallback_page(p, reason)))
        .collect()
}
