use docling_ingest::{
    chunker::{Chunk, ChunkSource, DocumentChunker, has_markdown_tables},
    report::ImageRecord,
};
use std::collections::BTreeMap;

fn image(id: &str, page: u32) -> ImageRecord {
    ImageRecord {
        image_id: id.to_string(),
        page_number: page,
        base64: "aGVsbG8=".to_string(),
        format: "PNG".to_string(),
        caption: None,
        ocr_text: None,
    }
}

fn source<'a>(
    markdown: &'a str,
    pages: Option<&'a BTreeMap<usize, String>>,
    images: &'a [ImageRecord],
) -> ChunkSource<'a> {
    ChunkSource {
        markdown,
        page_markdown: pages,
        images,
        table_count: 0,
        file_name: "report.pdf",
    }
}

fn page_map(items: &[(usize, &str)]) -> BTreeMap<usize, String> {
    items.iter().map(|(i, s)| (*i, s.to_string())).collect()
}

fn long_text(sentences: usize) -> String {
    (1..=sentences)
        .map(|i| format!("Sentence number {i} talks about topic {i} in detail."))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn two_pages_with_placeholder_image() {
    let pages = page_map(&[(0, "Intro text."), (1, "<!-- image -->\nCaption text.")]);
    let images = vec![image("image_1", 2)];
    let md = "Intro text.\n\n---\n\n<!-- image -->\nCaption text.";
    let chunks = DocumentChunker::new(1000, 200).chunk(source(md, Some(&pages), &images));

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].source_page, Some(1));
    assert_eq!(chunks[0].content, "Intro text.");
    assert!(chunks[0].metadata.images.is_empty());
    assert!(!chunks[0].metadata.chunk_complex);
    assert_eq!(chunks[0].metadata.modality, vec!["text"]);

    assert_eq!(chunks[1].source_page, Some(2));
    assert_eq!(chunks[1].metadata.images.len(), 1);
    assert_eq!(chunks[1].metadata.images[0].image_id, "image_1");
    assert_eq!(chunks[1].metadata.image_count, 1);
    assert!(chunks[1].metadata.chunk_complex);
    assert_eq!(chunks[1].metadata.modality, vec!["text", "images"]);

    assert!(chunks.iter().all(|c| c.metadata.document_complex));
    assert!(chunks.iter().all(|c| c.metadata.source_type == "application/pdf"));
    assert_eq!(chunks[0].chunk_id, "chunk_p1_1_0");
    assert_eq!(chunks[1].chunk_id, "chunk_p2_2_0");
}

#[test]
fn blank_pages_yield_no_chunks() {
    let pages = page_map(&[(0, "  \n "), (1, "Only page with text."), (2, "")]);
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &[]));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].source_page, Some(2));
    assert!(!chunks[0].metadata.document_complex);
}

#[test]
fn chunks_respect_size_and_overlap() {
    let text = long_text(30);
    let pages = page_map(&[(0, &text)]);
    let chunks = DocumentChunker::new(200, 50).chunk(source(&text, Some(&pages), &[]));
    assert!(chunks.len() > 3);

    let longest_sentence = 60;
    for c in &chunks {
        assert!(c.content.len() <= 200 + longest_sentence, "{}", c.content.len());
        assert!(c.char_start < c.char_end);
        assert!(c.char_end <= text.len());
    }

    for pair in chunks.windows(2) {
        let (prev, next) = (&pair[0].content, &pair[1].content);
        let head = next.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        let tail = &prev[prev.len().saturating_sub(60)..];
        assert!(tail.contains(&head), "{head:?} not in {tail:?}");
    }

    let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids[0], "chunk_p1_1_0");
    assert_eq!(ids[1], "chunk_p1_1_1");
}

#[test]
fn zero_overlap_shares_nothing() {
    let text = long_text(12);
    let pages = page_map(&[(0, &text)]);
    let chunks = DocumentChunker::new(120, 0).chunk(source(&text, Some(&pages), &[]));
    let joined = chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join(" ");
    assert_eq!(joined, text);
}

#[test]
fn text_chunks_come_back_in_page_order() {
    let pages = page_map(&[(0, &long_text(8)), (1, &long_text(8)), (2, "Last page.")]);
    let mut with_caption = image("image_1", 1);
    with_caption.caption = Some("A chart".into());
    let images = vec![with_caption];
    let chunks = DocumentChunker::new(150, 30).chunk(source("", Some(&pages), &images));

    let text: Vec<&Chunk> = chunks.iter().filter(|c| !c.metadata.primary_image).collect();
    let mut sorted = text.clone();
    sorted.sort_by_key(|c| c.order_key());
    assert_eq!(
        text.iter().map(|c| &c.chunk_id).collect::<Vec<_>>(),
        sorted.iter().map(|c| &c.chunk_id).collect::<Vec<_>>()
    );
    let pages_seen: Vec<u32> = text.iter().filter_map(|c| c.source_page).collect();
    assert!(pages_seen.windows(2).all(|w| w[0] <= w[1]));

    let last = chunks.last().unwrap();
    assert!(last.metadata.primary_image);
    assert_eq!(last.chunk_id, "chunk_img_1_0");
    assert_eq!(last.content, "Image Caption: A chart");
}

#[test]
fn caption_similarity_attaches_image() {
    let pages = page_map(&[(
        0,
        "The revenue growth chart shows quarterly results for every region.",
    )]);
    let mut img = image("image_1", 1);
    img.caption = Some("Quarterly revenue growth chart by region".into());
    let images = vec![img];
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &images));

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].metadata.images.len(), 1);
    let caption_chunk = &chunks[1];
    assert_eq!(caption_chunk.chunk_id, "chunk_img_1_0");
    assert_eq!(
        caption_chunk.content,
        "Image Caption: Quarterly revenue growth chart by region"
    );
    assert_eq!(caption_chunk.metadata.has_caption, Some(true));
    assert_eq!(caption_chunk.metadata.has_ocr_text, Some(false));
    assert!(caption_chunk.metadata.primary_image);
}

#[test]
fn unrelated_caption_does_not_attach() {
    let pages = page_map(&[(0, "Completely different prose about gardening tools.")]);
    let mut img = image("image_1", 1);
    img.caption = Some("Quarterly revenue growth chart by region".into());
    let images = vec![img];
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &images));
    assert!(chunks[0].metadata.images.is_empty());
}

#[test]
fn ocr_text_matching() {
    let pages = page_map(&[(0, "Totals: alpha bravo charlie delta echo foxtrot were counted.")]);
    let mut img = image("image_1", 1);
    img.ocr_text = Some("alpha bravo charlie delta foxtrot".into());
    let images = vec![img];
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &images));
    assert_eq!(chunks[0].metadata.images.len(), 1);
    assert_eq!(chunks[1].content, "Image Text (OCR): alpha bravo charlie delta foxtrot");
}

#[test]
fn images_stay_on_their_page() {
    let pages = page_map(&[(0, "First page prose."), (1, "<!-- image -->\nSecond page.")]);
    let images = vec![image("image_1", 1)];
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &images));
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.metadata.images.is_empty()));
}

#[test]
fn each_marker_takes_the_next_image_once() {
    let text = "<!-- image -->\nFirst figure.\n<!-- image -->\nSecond figure.";
    let pages = page_map(&[(0, text)]);
    let images = vec![image("image_1", 1), image("image_2", 1), image("image_3", 1)];
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &images));
    let ids: Vec<&str> = chunks[0]
        .metadata
        .images
        .iter()
        .map(|i| i.image_id.as_str())
        .collect();
    assert_eq!(ids, vec!["image_1", "image_2"]);
}

#[test]
fn header_sections_without_page_map() {
    let md = "# Introduction\nThis opening section explains what the document covers in detail.\n\
              # Methods\nThis section describes the methods used throughout the whole study.\n\
              # Tiny\nshort";
    let chunks = DocumentChunker::new(1000, 200).chunk(source(md, None, &[]));
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chunk_id, "chunk_h_0_1_0");
    assert_eq!(chunks[1].chunk_id, "chunk_h_1_1_0");
    assert!(chunks[0].content.starts_with("# Introduction"));
    assert!(chunks[1].content.starts_with("# Methods"));
    assert!(chunks.iter().all(|c| c.source_page == Some(1)));
    assert_eq!(chunks[0].char_start, 0);
}

#[test]
fn long_sections_are_split() {
    let md = format!("# Big\n{}", long_text(20));
    let chunks = DocumentChunker::new(200, 40).chunk(source(&md, None, &[]));
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.chunk_id.starts_with("chunk_h_0_1_")));
}

#[test]
fn split_section_ids_stay_unique_and_ordered() {
    let md = format!(
        "# Big\n{}\n# Second\nThe second section is short but long enough to be kept.\n\
         # Third\nThe third section is also short and comes after the second one.",
        long_text(20)
    );
    let chunks = DocumentChunker::new(200, 40).chunk(source(&md, None, &[]));
    assert!(chunks.len() > 3);

    let ids: std::collections::HashSet<&str> =
        chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids.len(), chunks.len(), "duplicate chunk ids");

    let mut sorted = chunks.clone();
    sorted.sort_by_key(|c| c.order_key());
    assert_eq!(sorted, chunks);
    assert!(sorted[0].content.starts_with("# Big"));
    assert!(sorted[sorted.len() - 2].content.starts_with("# Second"));
    assert!(sorted[sorted.len() - 1].content.starts_with("# Third"));
    assert!(chunks.iter().all(|c| c.order_key().is_some()));
}

#[test]
fn text_without_sections_uses_plain_ids() {
    let md = "<!-- image -->\nJust a body without any header lines at all, long enough to matter.";
    let images = vec![image("image_1", 1)];
    let chunks = DocumentChunker::new(1000, 200).chunk(source(md, None, &images));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_id, "chunk_1_0");
    assert_eq!(chunks[0].metadata.images.len(), 1);
}

#[test]
fn empty_map_falls_back_to_headers() {
    let empty = BTreeMap::new();
    let md = "# Heading\nThis body is long enough to survive the minimum section length filter.";
    let chunks = DocumentChunker::new(1000, 200).chunk(source(md, Some(&empty), &[]));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_id, "chunk_h_0_1_0");
}

#[test]
fn table_detection() {
    assert!(has_markdown_tables("| a | b |\n|---|---|\n| 1 | 2 |"));
    assert!(!has_markdown_tables("a | b"));
    assert!(!has_markdown_tables("| a | b |"));

    let pages = page_map(&[(0, "Data follows.\n| a | b |\n|---|---|\n| 1 | 2 |")]);
    let chunks = DocumentChunker::new(1000, 200).chunk(source("", Some(&pages), &[]));
    assert!(chunks[0].metadata.has_tables);
    assert!(chunks[0].metadata.chunk_complex);
}
