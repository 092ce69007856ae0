mod common;

use anyhow::{Result, anyhow};
use docling_ingest::{
    config::Config,
    engine::{
        ConvertMode, ConvertedDocument, Converter, EngineDiag, PageItem, PictureItem, TableItem,
    },
    page_extract::PageStream,
    processor::{Processor, estimate_tables, extract_page_markdown},
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Default)]
struct MockEngine {
    cheap: Option<ConvertedDocument>,
    /// Keyed by stream name; absent names convert to `None`.
    enhanced: BTreeMap<String, ConvertedDocument>,
    fail_streams: bool,
    calls: RefCell<Vec<ConvertMode>>,
    stream_batches: RefCell<Vec<Vec<String>>>,
}

impl Converter for MockEngine {
    fn doctor(&self) -> Result<EngineDiag> {
        Err(anyhow!("not used"))
    }

    fn convert(&self, _input: &Path, mode: ConvertMode) -> Result<ConvertedDocument> {
        self.calls.borrow_mut().push(mode);
        self.cheap.clone().ok_or_else(|| anyhow!("engine down"))
    }

    fn convert_streams(
        &self,
        streams: &[PageStream],
        mode: ConvertMode,
    ) -> Result<Vec<Option<ConvertedDocument>>> {
        self.calls.borrow_mut().push(mode);
        self.stream_batches
            .borrow_mut()
            .push(streams.iter().map(|s| s.name.clone()).collect());
        if self.fail_streams {
            return Err(anyhow!("gpu on fire"));
        }
        Ok(streams
            .iter()
            .map(|s| self.enhanced.get(&s.name).cloned())
            .collect())
    }
}

fn cheap_doc(pages: u32) -> ConvertedDocument {
    ConvertedDocument {
        markdown: (1..=pages).map(|p| format!("cheap {p}")).collect::<Vec<_>>().join("\n"),
        pages: Some(
            (1..=pages)
                .map(|p| PageItem {
                    page_no: p,
                    markdown: format!("cheap {p}"),
                })
                .collect(),
        ),
        tables: Some(vec![TableItem { page_no: Some(2) }]),
        pictures: Some(vec![PictureItem {
            page_no: Some(4),
            ..Default::default()
        }]),
    }
}

fn enhanced(md: &str, pictures: Vec<PictureItem>) -> ConvertedDocument {
    ConvertedDocument {
        markdown: md.to_string(),
        pages: None,
        tables: None,
        pictures: Some(pictures),
    }
}

fn five_page_pdf(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("report.pdf");
    common::write_pdf(&path, 5);
    path
}

#[test]
fn complex_pages_are_replaced_and_the_rest_kept() {
    let dir = tempfile::tempdir().unwrap();
    let input = five_page_pdf(dir.path());

    let mut engine = MockEngine {
        cheap: Some(cheap_doc(5)),
        ..Default::default()
    };
    engine.enhanced.insert("page_2.pdf".into(), enhanced("rich 2", vec![]));
    engine.enhanced.insert(
        "page_4.pdf".into(),
        enhanced(
            "rich 4\n<!-- image -->",
            vec![PictureItem {
                page_no: Some(1),
                base64: Some("aGVsbG8=".into()),
                caption: Some("A figure".into()),
                ocr_text: None,
            }],
        ),
    );

    let processor = Processor::new(&Config::default(), engine);
    let doc = processor.process_document(&input).expect("processed");

    let pages = doc.page_markdown.as_ref().unwrap();
    assert_eq!(pages.len(), 5);
    assert_eq!(pages[&0], "cheap 1");
    assert_eq!(pages[&1], "rich 2");
    assert_eq!(pages[&2], "cheap 3");
    assert_eq!(pages[&3], "rich 4\n<!-- image -->");
    assert_eq!(pages[&4], "cheap 5");

    assert_eq!(
        doc.markdown,
        "cheap 1\n\n---\n\nrich 2\n\n---\n\ncheap 3\n\n---\n\nrich 4\n<!-- image -->\n\n---\n\ncheap 5"
    );

    assert_eq!(doc.total_pages, 5);
    assert_eq!(doc.metadata.fast_pages, 3);
    assert_eq!(doc.metadata.complex_pages, 2);
    assert_eq!(doc.metadata.images_found, 1);
    assert_eq!(doc.images[0].page_number, 4);
    assert_eq!(doc.images[0].image_id, "image_1");
    assert_eq!(doc.images[0].format, "PNG");
    assert_eq!(doc.images[0].caption.as_deref(), Some("A figure"));
    assert_eq!(doc.file.file_name, "report.pdf");

    let engine = processor.engine();
    assert_eq!(
        *engine.calls.borrow(),
        vec![ConvertMode::Cheap, ConvertMode::HighFidelity]
    );
    assert_eq!(
        *engine.stream_batches.borrow(),
        vec![vec!["page_2.pdf".to_string(), "page_4.pdf".to_string()]]
    );
}

#[test]
fn enhanced_pass_failure_degrades_complex_pages_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = five_page_pdf(dir.path());
    let engine = MockEngine {
        cheap: Some(cheap_doc(5)),
        fail_streams: true,
        ..Default::default()
    };

    let doc = Processor::new(&Config::default(), engine)
        .process_document(&input)
        .expect("processed");
    let pages = doc.page_markdown.unwrap();
    assert_eq!(pages[&0], "cheap 1");
    assert!(pages[&1].starts_with("# Page 2\n\n[Error processing page:"));
    assert!(pages[&3].starts_with("# Page 4\n\n[Error processing page:"));
    assert!(doc.images.is_empty());
}

#[test]
fn missing_enhanced_document_gets_error_marker() {
    let dir = tempfile::tempdir().unwrap();
    let input = five_page_pdf(dir.path());
    let mut engine = MockEngine {
        cheap: Some(cheap_doc(5)),
        ..Default::default()
    };
    engine.enhanced.insert("page_2.pdf".into(), enhanced("rich 2", vec![]));

    let doc = Processor::new(&Config::default(), engine)
        .process_document(&input)
        .expect("processed");
    let pages = doc.page_markdown.unwrap();
    assert_eq!(pages[&1], "rich 2");
    assert_eq!(pages[&3], "# Page 4\n\nError processing page\n");
}

#[test]
fn cheap_pass_failure_stubs_every_page() {
    let dir = tempfile::tempdir().unwrap();
    let input = five_page_pdf(dir.path());
    let engine = MockEngine::default();

    let processor = Processor::new(&Config::default(), engine);
    let doc = processor.process_document(&input).expect("processed");
    let pages = doc.page_markdown.unwrap();
    assert_eq!(pages.len(), 5);
    for (i, md) in &pages {
        assert_eq!(md, &format!("# Page {}\n\n[Error: Easy mode processing failed]", i + 1));
    }
    assert_eq!(doc.metadata.complex_pages, 0);
    assert_eq!(*processor.engine().calls.borrow(), vec![ConvertMode::Cheap]);
}

#[test]
fn triage_runs_cheap_pass_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = five_page_pdf(dir.path());
    let engine = MockEngine {
        cheap: Some(cheap_doc(5)),
        ..Default::default()
    };
    let processor = Processor::new(&Config::default(), engine);
    let t = processor.triage(&input).unwrap();
    assert_eq!(t.complex_pages, vec![1, 3]);
    assert_eq!(*processor.engine().calls.borrow(), vec![ConvertMode::Cheap]);
}

#[test]
fn non_pdf_uses_default_mode_without_page_map() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.docx");
    std::fs::write(&input, b"stub").unwrap();
    let engine = MockEngine {
        cheap: Some(enhanced(
            "# Notes\n\nBody text.  ",
            vec![PictureItem {
                page_no: None,
                base64: Some("aGk=".into()),
                caption: None,
                ocr_text: Some("   ".into()),
            }],
        )),
        ..Default::default()
    };

    let processor = Processor::new(&Config::default(), engine);
    let doc = processor.process_document(&input).expect("processed");
    assert!(doc.page_markdown.is_none());
    assert_eq!(doc.total_pages, 1);
    assert_eq!(doc.markdown, "# Notes\n\nBody text.");
    assert_eq!(doc.images.len(), 1);
    assert_eq!(doc.images[0].page_number, 1);
    assert_eq!(doc.images[0].ocr_text, None);
    assert_eq!(*processor.engine().calls.borrow(), vec![ConvertMode::Default]);
}

#[test]
fn missing_input_is_none() {
    let processor = Processor::new(&Config::default(), MockEngine::default());
    assert!(processor.process_document(Path::new("/nonexistent/x.pdf")).is_none());
    assert!(processor.engine().calls.borrow().is_empty());
}

#[test]
fn page_markdown_falls_back_to_line_slices() {
    let doc = ConvertedDocument {
        markdown: "a\nb\nc\nd".into(),
        pages: Some(vec![PageItem {
            page_no: 1,
            markdown: "own first".into(),
        }]),
        ..Default::default()
    };
    let map = extract_page_markdown(&doc, 2);
    assert_eq!(map[&0], "own first");
    assert_eq!(map[&1], "c\nd");

    let empty = ConvertedDocument::default();
    let map = extract_page_markdown(&empty, 3);
    assert_eq!(map.len(), 3);
    assert!(map.values().all(String::is_empty));
}

#[test]
fn table_estimate_is_capped() {
    let mut pages = BTreeMap::new();
    pages.insert(0usize, "| a ".repeat(25));
    assert_eq!(estimate_tables(&pages).len(), 2);
    pages.insert(1usize, "| b ".repeat(500));
    let tables = estimate_tables(&pages);
    assert_eq!(tables.len(), 10);
    assert_eq!(tables[0].table_id, "table_1");
    assert!(estimate_tables(&BTreeMap::new()).is_empty());
}
