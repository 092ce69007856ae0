//! Overlap-aware chunking of processed markdown, with image association.
//!
//! Page-aware mode chunks each page on its own and tags chunks with the true
//! page number. Documents without a page map fall back to header sections.
//! Both modes share one sentence-accumulating splitter.

use crate::{
    config::{Chunking, Config},
    report::{ImageRecord, ProcessedDocument},
    util::mime_for_file_name,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

/// Placeholder docling leaves where a picture sat in the markdown.
pub const IMAGE_MARKER: &str = "<!-- image -->";

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"));
static MD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+.+").expect("valid regex"));
static LABEL_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][^.]*[:\(]").expect("valid regex"));
static TABLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s\-\|:]+$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub chunk_id: String,
    /// 1-based.
    pub source_page: Option<u32>,
    /// Byte offsets within the page or section the chunk was cut from.
    pub char_start: usize,
    pub char_end: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_type: String,
    pub file_name: String,
    pub images: Vec<ImageRecord>,
    pub image_count: usize,
    pub chunk_complex: bool,
    pub document_complex: bool,
    pub modality: Vec<String>,
    pub has_tables: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_caption: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_ocr_text: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_image: bool,
}

impl Chunk {
    /// Document-order key decoded from `chunk_id`:
    /// `(page, origin, section, sequence)` where origin 0 is text and 1 is an
    /// image description.
    pub fn order_key(&self) -> Option<(u32, u8, usize, usize)> {
        let rest = self.chunk_id.strip_prefix("chunk_")?;
        let nums = |s: &str| -> Option<Vec<usize>> {
            s.split('_').map(|p| p.parse().ok()).collect()
        };
        if let Some(img) = rest.strip_prefix("img_") {
            return match nums(img)?.as_slice() {
                [0, 1, i] => Some((1, 1, *i, 0)),
                [page, i] => Some((*page as u32, 1, *i, 0)),
                _ => None,
            };
        }
        if let Some(h) = rest.strip_prefix("h_") {
            return match nums(h)?.as_slice() {
                [section, page, n] => Some((*page as u32, 0, *section, *n)),
                _ => None,
            };
        }
        if let Some(p) = rest.strip_prefix('p') {
            return match nums(p)?.as_slice() {
                [page, _, n] => Some((*page as u32, 0, 0, *n)),
                _ => None,
            };
        }
        match nums(rest)?.as_slice() {
            [page, n] => Some((*page as u32, 0, 0, *n)),
            _ => None,
        }
    }
}

/// What the chunker needs from the processor.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSource<'a> {
    pub markdown: &'a str,
    /// 0-based page index to markdown.
    pub page_markdown: Option<&'a BTreeMap<usize, String>>,
    pub images: &'a [ImageRecord],
    pub table_count: usize,
    pub file_name: &'a str,
}

impl<'a> From<&'a ProcessedDocument> for ChunkSource<'a> {
    fn from(doc: &'a ProcessedDocument) -> Self {
        Self {
            markdown: &doc.markdown,
            page_markdown: doc.page_markdown.as_ref(),
            images: &doc.images,
            table_count: doc.tables.len(),
            file_name: &doc.file.file_name,
        }
    }
}

#[derive(Debug, Clone)]
struct Sentence {
    start: usize,
    text: String,
}

/// Per-document context threaded through the splitter.
struct DocContext<'a> {
    file_type: &'static str,
    file_name: &'a str,
    document_complex: bool,
}

/// Images available to chunks of one page (or one document), handed out at
/// most once each.
struct ImagePool<'a> {
    images: Vec<&'a ImageRecord>,
    assigned: Vec<bool>,
}

impl<'a> ImagePool<'a> {
    fn new(images: Vec<&'a ImageRecord>) -> Self {
        let assigned = vec![false; images.len()];
        Self { images, assigned }
    }

    fn unassigned(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.images.len()).filter(|&i| !self.assigned[i])
    }

    fn take(&mut self, i: usize) -> ImageRecord {
        self.assigned[i] = true;
        self.images[i].clone()
    }
}

pub struct DocumentChunker {
    cfg: Chunking,
}

impl DocumentChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            cfg: Chunking {
                chunk_size,
                overlap,
                ..Chunking::default()
            },
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cfg: cfg.chunking.clone(),
        }
    }

    /// Page-aware chunking when a page map is present, header sections otherwise.
    pub fn chunk(&self, src: ChunkSource<'_>) -> Vec<Chunk> {
        match src.page_markdown.filter(|m| !m.is_empty()) {
            Some(pages) => {
                debug!("using page-aware chunking");
                self.chunk_with_pages(src, pages)
            }
            None => {
                debug!("using header-aware chunking");
                self.chunk_by_headers(src)
            }
        }
    }

    fn context<'a>(&self, src: &ChunkSource<'a>) -> DocContext<'a> {
        let document_complex = !src.images.is_empty()
            || src.table_count > 0
            || has_markdown_tables(src.markdown);
        DocContext {
            file_type: mime_for_file_name(src.file_name),
            file_name: src.file_name,
            document_complex,
        }
    }

    pub fn chunk_with_pages(
        &self,
        src: ChunkSource<'_>,
        pages: &BTreeMap<usize, String>,
    ) -> Vec<Chunk> {
        let ctx = self.context(&src);
        let mut chunks = Vec::new();

        for (&index, text) in pages {
            if text.trim().is_empty() {
                continue;
            }
            let page = index as u32 + 1;
            let mut pool = ImagePool::new(
                src.images
                    .iter()
                    .filter(|img| img.page_number == page)
                    .collect(),
            );
            chunks.extend(self.split_text_into_chunks(
                text,
                page,
                &format!("p{page}"),
                &mut pool,
                &ctx,
            ));
        }

        for (i, image) in src.images.iter().enumerate() {
            let page = image.page_number;
            if let Some(chunk) = self.image_chunk(image, &format!("chunk_img_{page}_{i}"), page, 0, &ctx)
            {
                chunks.push(chunk);
            }
        }

        chunks
    }

    pub fn chunk_by_headers(&self, src: ChunkSource<'_>) -> Vec<Chunk> {
        let ctx = self.context(&src);
        let mut chunks = Vec::new();
        let mut pool = ImagePool::new(src.images.iter().collect());

        if !src.markdown.trim().is_empty() {
            let sections = self.split_by_headers(src.markdown);
            if sections.is_empty() {
                chunks.extend(self.split_text_into_chunks(src.markdown, 1, "", &mut pool, &ctx));
            }
            let mut pos = 0usize;
            for (i, section) in sections.iter().enumerate() {
                if section.len() <= self.cfg.chunk_size {
                    let images = self.images_for_chunk(section, 0, &mut pool);
                    let has_tables = has_markdown_tables(section);
                    chunks.push(make_chunk(
                        section,
                        format!("chunk_h_{i}_1_0"),
                        1,
                        pos,
                        pos + section.len(),
                        chunk_metadata(&ctx, images, has_tables),
                    ));
                    pos += section.len() + 1;
                } else {
                    chunks.extend(self.split_text_into_chunks(
                        section,
                        1,
                        &format!("h_{i}"),
                        &mut pool,
                        &ctx,
                    ));
                }
            }
        }

        for (i, image) in src.images.iter().enumerate() {
            let start = src.markdown.len() + i * 100;
            if let Some(chunk) = self.image_chunk(image, &format!("chunk_img_0_1_{i}"), 1, start, &ctx) {
                chunks.push(chunk);
            }
        }

        chunks
    }

    /// Dedicated chunk for an image's caption and OCR text, if it has either.
    fn image_chunk(
        &self,
        image: &ImageRecord,
        chunk_id: &str,
        page: u32,
        start: usize,
        ctx: &DocContext<'_>,
    ) -> Option<Chunk> {
        let mut parts = Vec::new();
        if let Some(caption) = image.caption.as_deref().filter(|c| !c.trim().is_empty()) {
            parts.push(format!("Image Caption: {caption}"));
        }
        if let Some(ocr) = image.ocr_text.as_deref().filter(|o| !o.trim().is_empty()) {
            parts.push(format!("Image Text (OCR): {ocr}"));
        }
        if parts.is_empty() {
            return None;
        }
        let content = parts.join("\n");
        let mut metadata = chunk_metadata(ctx, vec![image.clone()], false);
        metadata.has_caption = Some(image.caption.is_some());
        metadata.has_ocr_text = Some(image.ocr_text.is_some());
        metadata.primary_image = true;
        let end = start + content.len();
        Some(make_chunk(&content, chunk_id.to_string(), page, start, end, metadata))
    }

    /// Sections split at header-like lines; short sections and sections that
    /// open with an HTML comment are dropped.
    pub fn split_by_headers(&self, text: &str) -> Vec<String> {
        let mut sections: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            if is_header_line(line.trim()) && !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            current.push(line);
        }
        if !current.is_empty() {
            sections.push(current);
        }

        sections
            .into_iter()
            .map(|lines| lines.join("\n").trim().to_string())
            .filter(|s| s.len() > self.cfg.min_section_chars && !s.starts_with("<!--"))
            .collect()
    }

    /// Greedy sentence accumulation with word-aligned overlap between chunks.
    fn split_text_into_chunks(
        &self,
        text: &str,
        page: u32,
        prefix: &str,
        pool: &mut ImagePool<'_>,
        ctx: &DocContext<'_>,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let text = text.trim();
        if text.is_empty() {
            return chunks;
        }

        let chunk_id = |n: usize| {
            if prefix.is_empty() {
                format!("chunk_{page}_{n}")
            } else {
                format!("chunk_{prefix}_{page}_{n}")
            }
        };

        let mut current = String::new();
        // Bytes of `current` carried over from the previous chunk.
        let mut carried = 0usize;
        let mut start = 0usize;
        let mut end = 0usize;
        let mut count = 0usize;

        for sentence in split_into_sentences(text) {
            let sentence_end = (sentence.start + sentence.text.len()).min(text.len());
            if !current.is_empty()
                && current.len() + 1 + sentence.text.len() > self.cfg.chunk_size
            {
                let images = self.images_for_chunk(&current, carried, pool);
                let has_tables = has_markdown_tables(&current);
                chunks.push(make_chunk(
                    &current,
                    chunk_id(count),
                    page,
                    start,
                    end,
                    chunk_metadata(ctx, images, has_tables),
                ));
                count += 1;

                let overlap = overlap_tail(&current, self.cfg.overlap).to_string();
                if overlap.is_empty() {
                    current = sentence.text;
                    carried = 0;
                    start = sentence.start;
                } else {
                    carried = overlap.len() + 1;
                    start = sentence.start.saturating_sub(carried);
                    current = format!("{overlap} {}", sentence.text);
                }
            } else if current.is_empty() {
                start = sentence.start;
                current = sentence.text;
            } else {
                current.push(' ');
                current.push_str(&sentence.text);
            }
            end = sentence_end;
        }

        if !current.trim().is_empty() {
            let images = self.images_for_chunk(&current, carried, pool);
            let has_tables = has_markdown_tables(&current);
            chunks.push(make_chunk(
                &current,
                chunk_id(count),
                page,
                start,
                end,
                chunk_metadata(ctx, images, has_tables),
            ));
        }

        chunks
    }

    /// Images for one chunk.
    ///
    /// Placeholder markers are authoritative: each marker in the chunk's own
    /// text (past the carried-over overlap) takes the next unassigned image.
    /// Without markers, the first image whose caption or OCR text overlaps the
    /// chunk wins.
    fn images_for_chunk(
        &self,
        text: &str,
        carried: usize,
        pool: &mut ImagePool<'_>,
    ) -> Vec<ImageRecord> {
        if text.contains(IMAGE_MARKER) {
            let fresh = text.get(carried.min(text.len())..).unwrap_or(text);
            let wanted = fresh.matches(IMAGE_MARKER).count();
            let picks: Vec<usize> = pool.unassigned().take(wanted).collect();
            return picks.into_iter().map(|i| pool.take(i)).collect();
        }

        let lower = text.to_lowercase();
        let hit = pool.unassigned().find(|&i| {
            let image = pool.images[i];
            self.caption_matches(image, &lower) || self.ocr_matches(image, &lower)
        });
        match hit {
            Some(i) => vec![pool.take(i)],
            None => Vec::new(),
        }
    }

    fn caption_matches(&self, image: &ImageRecord, chunk_lower: &str) -> bool {
        let Some(caption) = image.caption.as_deref().map(str::trim) else {
            return false;
        };
        if caption.chars().count() <= self.cfg.caption_min_chars {
            return false;
        }
        token_overlap(caption, chunk_lower, 4, 2, self.cfg.caption_match_ratio)
    }

    fn ocr_matches(&self, image: &ImageRecord, chunk_lower: &str) -> bool {
        let Some(ocr) = image.ocr_text.as_deref().map(str::trim) else {
            return false;
        };
        if ocr.chars().count() <= self.cfg.ocr_min_chars {
            return false;
        }
        token_overlap(ocr, chunk_lower, 4, 3, self.cfg.ocr_match_ratio)
    }
}

/// True when more than `min_tokens` tokens of at least `min_len` chars exist
/// and at least `ratio` of them occur in `chunk_lower`.
fn token_overlap(
    source: &str,
    chunk_lower: &str,
    min_len: usize,
    min_tokens: usize,
    ratio: f64,
) -> bool {
    let lower = source.to_lowercase();
    let tokens: Vec<&str> = lower
        .split_whitespace()
        .filter(|w| w.chars().count() >= min_len)
        .collect();
    if tokens.len() <= min_tokens {
        return false;
    }
    let hits = tokens.iter().filter(|w| chunk_lower.contains(**w)).count();
    hits as f64 >= tokens.len() as f64 * ratio
}

fn is_header_line(line: &str) -> bool {
    if MD_HEADER.is_match(line) {
        return true;
    }
    if line.is_empty() || line.len() >= 100 {
        return false;
    }
    if line.ends_with('.') || line.ends_with(',') || line.starts_with('-') || line.starts_with('*')
    {
        return false;
    }
    is_upper(line) || LABEL_HEADER.is_match(line)
}

/// At least one cased letter and no lowercase ones.
fn is_upper(s: &str) -> bool {
    s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
}

/// Trailing `overlap` bytes of `chunk`, advanced to the next whitespace so the
/// first word is not cut. Chunks no longer than `overlap` carry over whole.
fn overlap_tail(chunk: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    if chunk.len() <= overlap {
        return chunk;
    }
    let mut from = chunk.len() - overlap;
    while !chunk.is_char_boundary(from) {
        from += 1;
    }
    let candidate = &chunk[from..];
    match candidate.find(char::is_whitespace) {
        Some(pos) => candidate[pos..].trim(),
        None => candidate.trim(),
    }
}

/// Sentences with their byte offsets in `text`. Falls back to lines, then to
/// bare periods, when punctuation splitting finds one sentence or fewer.
fn split_into_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END.find_iter(text) {
        push_trimmed(&mut sentences, text, last, m.end());
        last = m.end();
    }
    push_trimmed(&mut sentences, text, last, text.len());
    if sentences.len() > 1 {
        return sentences;
    }

    let mut lines = Vec::new();
    let mut offset = 0;
    for line in text.split('\n') {
        push_trimmed(&mut lines, text, offset, offset + line.len());
        offset += line.len() + 1;
    }
    if lines.len() > 1 {
        return lines;
    }

    let mut pieces = Vec::new();
    let mut offset = 0;
    for piece in text.split('.') {
        let before = pieces.len();
        push_trimmed(&mut pieces, text, offset, offset + piece.len());
        if pieces.len() > before {
            if let Some(last) = pieces.last_mut() {
                last.text.push('.');
            }
        }
        offset += piece.len() + 1;
    }
    if pieces.len() > 1 {
        return pieces;
    }

    lines
}

fn push_trimmed(out: &mut Vec<Sentence>, text: &str, from: usize, to: usize) {
    let raw = &text[from..to];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = raw.len() - raw.trim_start().len();
    out.push(Sentence {
        start: from + lead,
        text: trimmed.to_string(),
    });
}

/// At least two table-looking lines: two or more pipes, or a separator row.
pub fn has_markdown_tables(text: &str) -> bool {
    let indicators = text
        .split('\n')
        .map(str::trim)
        .filter(|line| {
            line.matches('|').count() >= 2
                || (line.contains('|') && TABLE_SEPARATOR.is_match(line))
        })
        .count();
    indicators >= 2
}

fn chunk_metadata(ctx: &DocContext<'_>, images: Vec<ImageRecord>, has_tables: bool) -> ChunkMetadata {
    let mut modality = vec!["text".to_string()];
    if !images.is_empty() {
        modality.push("images".to_string());
    }
    ChunkMetadata {
        source_type: ctx.file_type.to_string(),
        file_name: ctx.file_name.to_string(),
        image_count: images.len(),
        chunk_complex: !images.is_empty() || has_tables,
        images,
        document_complex: ctx.document_complex,
        modality,
        has_tables,
        ..Default::default()
    }
}

fn make_chunk(
    content: &str,
    chunk_id: String,
    page: u32,
    char_start: usize,
    char_end: usize,
    metadata: ChunkMetadata,
) -> Chunk {
    Chunk {
        content: content.trim().to_string(),
        chunk_id,
        source_page: Some(page),
        char_start,
        char_end,
        metadata,
    }
}
