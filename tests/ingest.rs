use anyhow::{Result, anyhow};
use docling_ingest::{
    chunker::{Chunk, ChunkMetadata},
    config::Config,
    embed::add_file_metadata,
    ingest::{BELONGS_TO_TEXT, HAS_IMAGES, IngestionWriter, node_uuid, resolve_user},
    nodes::{NodesDocument, create_nodes_document},
    report::ImageRecord,
    store::{Property, StoreObject, VectorStore},
};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Default)]
struct MockStore {
    collections: RefCell<BTreeSet<String>>,
    tenants: RefCell<BTreeSet<(String, String)>>,
    upserts: RefCell<Vec<(String, String, Vec<StoreObject>)>>,
    references: RefCell<Vec<(String, Uuid, String, String, Uuid)>>,
    fail_references: bool,
}

impl VectorStore for MockStore {
    fn ensure_collection(&self, name: &str, _properties: &[Property]) -> Result<bool> {
        Ok(self.collections.borrow_mut().insert(name.to_string()))
    }

    fn ensure_reference_property(&self, _from: &str, _property: &str, _to: &str) -> Result<()> {
        Ok(())
    }

    fn ensure_tenant(&self, collection: &str, tenant: &str) -> Result<()> {
        self.tenants
            .borrow_mut()
            .insert((collection.to_string(), tenant.to_string()));
        Ok(())
    }

    fn upsert_objects(
        &self,
        collection: &str,
        tenant: &str,
        objects: &[StoreObject],
    ) -> Result<usize> {
        self.upserts
            .borrow_mut()
            .push((collection.to_string(), tenant.to_string(), objects.to_vec()));
        Ok(0)
    }

    fn add_reference(
        &self,
        collection: &str,
        _tenant: &str,
        from: Uuid,
        property: &str,
        to_collection: &str,
        to: Uuid,
    ) -> Result<()> {
        if self.fail_references {
            return Err(anyhow!("reference endpoint unavailable"));
        }
        self.references.borrow_mut().push((
            collection.to_string(),
            from,
            property.to_string(),
            to_collection.to_string(),
            to,
        ));
        Ok(())
    }
}

fn chunk(content: &str, page: u32, images: Vec<ImageRecord>) -> Chunk {
    Chunk {
        content: content.to_string(),
        chunk_id: String::new(),
        source_page: Some(page),
        char_start: 0,
        char_end: content.len(),
        metadata: ChunkMetadata {
            file_name: "report.pdf".into(),
            images,
            ..Default::default()
        },
    }
}

fn doc(user: Option<&str>) -> NodesDocument {
    let img = ImageRecord {
        image_id: "image_1".into(),
        page_number: 2,
        base64: "aGVsbG8=".into(),
        format: "PNG".into(),
        caption: None,
        ocr_text: None,
    };
    let chunks = vec![chunk("first", 1, vec![]), chunk("second", 2, vec![img])];
    let mut d = create_nodes_document(&chunks, "report.pdf", Some("ffff1234"), user);
    add_file_metadata(&mut d);
    d
}

#[test]
fn uuids_are_v5_and_stable() {
    let a = node_uuid("txt_1234_p01_c01");
    assert_eq!(a, node_uuid("txt_1234_p01_c01"));
    assert_eq!(a, Uuid::new_v5(&Uuid::NAMESPACE_URL, b"txt_1234_p01_c01"));
    assert_ne!(a, node_uuid("txt_1234_p01_c02"));

    let raw = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";
    assert_eq!(node_uuid(raw).to_string(), raw);
}

#[test]
fn writes_objects_and_links_both_ways() {
    let store = MockStore::default();
    let cfg = Config::default();
    let mut urls = HashMap::new();
    urls.insert("img_1234_p02_i01".to_string(), "out/dev/images/img_1234_p02_i01.png".to_string());

    let report = IngestionWriter::new(&cfg, &store)
        .ingest(&doc(Some("dev")), None, &urls)
        .unwrap();
    assert_eq!(report.tenant, "dev");
    assert_eq!(report.text_objects, 2);
    assert_eq!(report.image_objects, 1);
    assert_eq!(report.failed_objects, 0);
    assert_eq!(report.references_added, 2);

    assert!(store.collections.borrow().contains("TextChunk"));
    assert!(store.collections.borrow().contains("ImageChunk"));
    assert!(store.tenants.borrow().contains(&("TextChunk".to_string(), "dev".to_string())));
    assert!(store.tenants.borrow().contains(&("ImageChunk".to_string(), "dev".to_string())));

    let upserts = store.upserts.borrow();
    let (coll, tenant, texts) = &upserts[0];
    assert_eq!((coll.as_str(), tenant.as_str()), ("TextChunk", "dev"));
    assert_eq!(texts[0].uuid, node_uuid("txt_1234_p01_c01"));
    assert_eq!(texts[0].properties["text"], "first");
    assert_eq!(texts[0].properties["chunk_id"], "txt_1234_p01_c01");
    assert_eq!(texts[0].properties["user"], "dev");
    assert_eq!(texts[0].properties["file_sha256"], "ffff1234");
    assert_eq!(texts[0].properties["source_mime"], "application/pdf");
    assert_eq!(texts[0].properties["total_nodes"], 3);
    assert_eq!(texts[0].properties["page"], 1);

    let (coll, _, images) = &upserts[1];
    assert_eq!(coll, "ImageChunk");
    assert_eq!(images[0].properties["image_url"], "out/dev/images/img_1234_p02_i01.png");
    assert_eq!(images[0].properties["page"], 2);

    let refs = store.references.borrow();
    let text_uuid = node_uuid("txt_1234_p02_c01");
    let image_uuid = node_uuid("img_1234_p02_i01");
    assert!(refs.contains(&(
        "TextChunk".into(),
        text_uuid,
        HAS_IMAGES.into(),
        "ImageChunk".into(),
        image_uuid
    )));
    assert!(refs.contains(&(
        "ImageChunk".into(),
        image_uuid,
        BELONGS_TO_TEXT.into(),
        "TextChunk".into(),
        text_uuid
    )));
}

#[test]
fn batches_follow_configured_size() {
    let store = MockStore::default();
    let mut cfg = Config::default();
    cfg.store.batch_size = 1;
    IngestionWriter::new(&cfg, &store)
        .ingest(&doc(Some("dev")), None, &HashMap::new())
        .unwrap();
    assert_eq!(store.upserts.borrow().len(), 3);
}

#[test]
fn reference_failures_are_counted_not_fatal() {
    let store = MockStore {
        fail_references: true,
        ..Default::default()
    };
    let report = IngestionWriter::new(&Config::default(), &store)
        .ingest(&doc(Some("dev")), None, &HashMap::new())
        .unwrap();
    assert_eq!(report.references_added, 0);
    assert_eq!(report.references_failed, 2);
    assert_eq!(store.upserts.borrow().len(), 2);
}

#[test]
fn empty_document_is_rejected() {
    let store = MockStore::default();
    let empty = create_nodes_document(&[], "report.pdf", None, Some("dev"));
    let err = IngestionWriter::new(&Config::default(), &store)
        .ingest(&empty, None, &HashMap::new())
        .unwrap_err();
    assert!(err.to_string().contains("no nodes"));
    assert!(store.upserts.borrow().is_empty());
}

#[test]
fn missing_user_is_rejected() {
    let store = MockStore::default();
    let err = IngestionWriter::new(&Config::default(), &store)
        .ingest(&doc(None), None, &HashMap::new())
        .unwrap_err();
    assert!(err.to_string().contains("no user"));
    assert!(store.collections.borrow().is_empty());
}

#[test]
fn user_resolution_order() {
    let d = doc(Some("from-doc"));
    assert_eq!(resolve_user(&d, Some("override")).as_deref(), Some("override"));
    assert_eq!(resolve_user(&d, None).as_deref(), Some("from-doc"));

    let mut d = doc(None);
    assert_eq!(resolve_user(&d, None), None);
    d.nodes[1]
        .extra_mut()
        .insert("user".into(), serde_json::Value::String("node-user".into()));
    assert_eq!(resolve_user(&d, None).as_deref(), Some("node-user"));
}
