//! Adaptive two-pass document processing.
//!
//! A cheap conversion runs over the whole PDF first. Pages whose cheap result
//! shows tables or pictures are cut out and converted again with table
//! structure and picture rendering enabled; everything else keeps the cheap
//! markdown. Non-PDF input gets a single default-mode conversion.

use crate::{
    config::Config,
    engine::{ConvertMode, ConvertedDocument, Converter},
    page_extract::{self, extract_pages_to_memory},
    postprocess::{clean_page, fallback_pages, merge_markdown_by_page, merge_processing_results},
    report::{FileInfo, ImageRecord, ProcessedDocument, ProcessingMetadata, TableRecord},
    triage::{self, TriageResult},
    util::{file_name_of, is_pdf},
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct Processor<C: Converter> {
    cfg: Config,
    engine: C,
}

/// High-fidelity output for the complex pages of one document.
#[derive(Debug, Default)]
pub struct ComplexPassOutput {
    pub page_markdown: BTreeMap<usize, String>,
    pub images: Vec<ImageRecord>,
}

impl<C: Converter> Processor<C> {
    pub fn new(cfg: &Config, engine: C) -> Self {
        Self {
            cfg: cfg.clone(),
            engine,
        }
    }

    pub fn engine(&self) -> &C {
        &self.engine
    }

    /// Runs the full pipeline for one file.
    ///
    /// Returns `None` only when the input does not exist or nothing at all
    /// could be produced; conversion failures degrade to per-page stubs.
    pub fn process_document(&self, input: &Path) -> Option<ProcessedDocument> {
        if !input.exists() {
            warn!("input does not exist: {}", input.display());
            return None;
        }

        let started = Instant::now();
        let result = if is_pdf(input) {
            self.process_pdf(input, started)
        } else {
            self.process_non_pdf(input, started)
        };

        match result {
            Ok(doc) => Some(doc),
            Err(err) => {
                error!("processing {} failed: {err:#}", input.display());
                None
            }
        }
    }

    fn process_pdf(&self, input: &Path, started: Instant) -> Result<ProcessedDocument> {
        let total_pages = page_extract::page_count(input)?;

        let t = Instant::now();
        let (easy_doc, easy_pages) = self.process_easy_mode(input, total_pages);
        let easy_time = t.elapsed().as_secs_f64();

        let t = Instant::now();
        let triage = triage::analyze_and_triage_pages(easy_doc.as_ref(), total_pages);
        let triage_time = t.elapsed().as_secs_f64();
        info!(
            total_pages,
            simple = triage.simple_pages.len(),
            complex = triage.complex_pages.len(),
            "page triage"
        );
        debug!(labels = ?triage.labels, "page labels");

        let t = Instant::now();
        let complex = self.process_complex_pages(input, &triage.complex_pages);
        let complex_time = t.elapsed().as_secs_f64();

        let t = Instant::now();
        let final_pages =
            merge_processing_results(&easy_pages, &complex.page_markdown, &triage.complex_pages);
        let markdown = merge_markdown_by_page(
            &final_pages,
            total_pages,
            &self.cfg.processing.page_separator,
        );
        let merge_time = t.elapsed().as_secs_f64();

        let tables = estimate_tables(&complex.page_markdown);
        let metadata = ProcessingMetadata {
            page_count: total_pages,
            fast_pages: triage.simple_pages.len(),
            complex_pages: triage.complex_pages.len(),
            images_found: complex.images.len(),
            tables_found: tables.len(),
            total_text_length: markdown.len(),
            processing_time: started.elapsed().as_secs_f64(),
            easy_mode_time: easy_time,
            triage_time,
            complex_mode_time: complex_time,
            merge_time,
        };
        info!("document processing completed: {total_pages} pages processed");

        Ok(ProcessedDocument {
            markdown,
            page_markdown: Some(final_pages),
            total_pages,
            images: complex.images,
            tables,
            metadata,
            file: file_info(input)?,
        })
    }

    /// Cheap pass and triage only, without the enhanced pass.
    pub fn triage(&self, input: &Path) -> Result<TriageResult> {
        let total_pages = page_extract::page_count(input)?;
        let (doc, _) = self.process_easy_mode(input, total_pages);
        Ok(triage::analyze_and_triage_pages(doc.as_ref(), total_pages))
    }

    /// Cheap whole-document pass. On engine failure every page gets a stub.
    pub fn process_easy_mode(
        &self,
        input: &Path,
        total_pages: usize,
    ) -> (Option<ConvertedDocument>, BTreeMap<usize, String>) {
        info!("processing document ({total_pages} pages)");
        match self.engine.convert(input, ConvertMode::Cheap) {
            Ok(doc) => {
                let pages = extract_page_markdown(&doc, total_pages)
                    .into_iter()
                    .map(|(i, md)| (i, clean_page(&self.cfg, &md)))
                    .collect();
                (Some(doc), pages)
            }
            Err(err) => {
                error!("easy mode conversion failed: {err:#}");
                let all: Vec<usize> = (0..total_pages).collect();
                (
                    None,
                    fallback_pages(&all, "Error: Easy mode processing failed"),
                )
            }
        }
    }

    /// High-fidelity pass over exactly the complex pages.
    pub fn process_complex_pages(&self, input: &Path, pages: &[usize]) -> ComplexPassOutput {
        if pages.is_empty() {
            return ComplexPassOutput::default();
        }
        info!(
            "found {} complex pages, processing with enhanced mode",
            pages.len()
        );

        let streams = extract_pages_to_memory(input, pages);
        if streams.is_empty() {
            return ComplexPassOutput {
                page_markdown: fallback_pages(pages, "Error: Failed to extract page"),
                images: Vec::new(),
            };
        }

        let results = match self.engine.convert_streams(&streams, ConvertMode::HighFidelity) {
            Ok(results) => results,
            Err(err) => {
                error!("enhanced processing failed: {err:#}");
                return ComplexPassOutput {
                    page_markdown: fallback_pages(pages, &format!("Error processing page: {err}")),
                    images: Vec::new(),
                };
            }
        };

        let mut out = ComplexPassOutput::default();
        for (stream, result) in streams.iter().zip(results) {
            match result {
                Some(doc) => {
                    let md = clean_page(&self.cfg, doc.export_to_markdown());
                    let md = if md.trim().is_empty() { String::new() } else { md };
                    out.page_markdown.insert(stream.index, md);
                    let first_id = out.images.len() + 1;
                    out.images
                        .extend(extract_images_from_result(&doc, stream.index as u32 + 1, first_id));
                }
                None => {
                    warn!("no enhanced result for page {}", stream.index + 1);
                    out.page_markdown.insert(
                        stream.index,
                        format!(
                            "# Page {}\n\n{}\n",
                            stream.index + 1,
                            self.cfg.processing.error_fallback
                        ),
                    );
                }
            }
        }
        out
    }

    fn process_non_pdf(&self, input: &Path, started: Instant) -> Result<ProcessedDocument> {
        info!("processing document: {}", file_name_of(input));
        let doc = self
            .engine
            .convert(input, ConvertMode::Default)
            .with_context(|| format!("document processing failed: {}", input.display()))?;

        let markdown = clean_page(&self.cfg, doc.export_to_markdown());
        let images = extract_images_from_result(&doc, 1, 1);

        let metadata = ProcessingMetadata {
            page_count: 1,
            fast_pages: 1,
            complex_pages: 0,
            images_found: images.len(),
            tables_found: 0,
            total_text_length: markdown.len(),
            processing_time: started.elapsed().as_secs_f64(),
            ..Default::default()
        };
        info!(
            "document processing completed in {:.2}s",
            metadata.processing_time
        );

        Ok(ProcessedDocument {
            markdown,
            page_markdown: None,
            total_pages: 1,
            images,
            tables: Vec::new(),
            metadata,
            file: file_info(input)?,
        })
    }
}

fn file_info(input: &Path) -> Result<FileInfo> {
    let meta = std::fs::metadata(input).with_context(|| "stat input")?;
    Ok(FileInfo {
        file_name: file_name_of(input),
        file_size: meta.len(),
    })
}

/// Per-page markdown from a cheap-pass document, keyed by 0-based index.
///
/// The engine's own page export wins; blank pages fall back to a proportional
/// line slice of the whole-document markdown, and to an empty string after that.
pub fn extract_page_markdown(
    doc: &ConvertedDocument,
    total_pages: usize,
) -> BTreeMap<usize, String> {
    let full = doc.export_to_markdown();
    let lines: Vec<&str> = full.split('\n').collect();
    let slice = |i: usize| -> String {
        if full.trim().is_empty() || total_pages == 0 {
            return String::new();
        }
        let per_page = (lines.len() / total_pages).max(1);
        let start = (i * per_page).min(lines.len());
        let end = ((i + 1) * per_page).min(lines.len());
        lines[start..end].join("\n").trim().to_string()
    };

    let mut own: BTreeMap<usize, &str> = BTreeMap::new();
    for page in doc.pages.iter().flatten() {
        let idx = page.page_no.saturating_sub(1) as usize;
        if idx < total_pages {
            own.insert(idx, page.markdown.as_str());
        }
    }

    (0..total_pages)
        .map(|i| {
            let content = match own.get(&i) {
                Some(md) if !md.trim().is_empty() => md.trim().to_string(),
                _ => slice(i),
            };
            (i, content)
        })
        .collect()
}

/// Images rendered by the engine for one result.
///
/// `page_offset` is the 1-based source page of the result's first page; ids
/// are numbered from `first_id`.
pub fn extract_images_from_result(
    doc: &ConvertedDocument,
    page_offset: u32,
    first_id: usize,
) -> Vec<ImageRecord> {
    let mut images = Vec::new();
    for picture in doc.pictures.iter().flatten() {
        let Some(b64) = picture.base64.as_deref().filter(|b| !b.is_empty()) else {
            debug!("picture without image data skipped");
            continue;
        };
        let page_number = match picture.page_no {
            Some(p) => p + page_offset - 1,
            None => page_offset,
        };
        images.push(ImageRecord {
            image_id: format!("image_{}", first_id + images.len()),
            page_number,
            base64: b64.to_string(),
            format: "PNG".to_string(),
            caption: picture.caption.clone().filter(|c| !c.trim().is_empty()),
            ocr_text: picture.ocr_text.clone().filter(|o| !o.trim().is_empty()),
        });
    }
    images
}

/// Rough table count from markdown pipe cells on the enhanced pages.
pub fn estimate_tables(complex_markdown: &BTreeMap<usize, String>) -> Vec<TableRecord> {
    let cells: usize = complex_markdown.values().map(|md| md.matches("| ").count()).sum();
    if cells == 0 {
        return Vec::new();
    }
    (1..=(cells / 10).min(10))
        .map(|i| TableRecord {
            table_id: format!("table_{i}"),
        })
        .collect()
}
