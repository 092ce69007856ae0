//! Writes a nodes document into the vector store, one tenant per user.

use crate::config::Config;
use crate::nodes::{ImageNode, NodesDocument, TextNode};
use crate::store::{DataType, Property, StoreObject, VectorStore};
use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

pub const HAS_IMAGES: &str = "hasImages";
pub const BELONGS_TO_TEXT: &str = "belongsToText";

const COMMON_PROPERTIES: [Property; 7] = [
    Property { name: "file_name", data_type: DataType::Text },
    Property { name: "page", data_type: DataType::Int },
    Property { name: "file_sha256", data_type: DataType::Text },
    Property { name: "user", data_type: DataType::Text },
    Property { name: "source_mime", data_type: DataType::Text },
    Property { name: "total_nodes", data_type: DataType::Int },
    Property { name: "chunk_id", data_type: DataType::Text },
];

const TEXT_PROPERTIES: [Property; 6] = [
    Property { name: "text", data_type: DataType::Text },
    Property { name: "char_start", data_type: DataType::Int },
    Property { name: "char_len", data_type: DataType::Int },
    Property { name: "is_complex", data_type: DataType::Bool },
    Property { name: "has_tables", data_type: DataType::Bool },
    Property { name: "image_refs", data_type: DataType::TextArray },
];

const IMAGE_PROPERTIES: [Property; 1] = [Property { name: "image_url", data_type: DataType::Text }];

pub fn text_schema() -> Vec<Property> {
    COMMON_PROPERTIES.iter().chain(&TEXT_PROPERTIES).copied().collect()
}

pub fn image_schema() -> Vec<Property> {
    COMMON_PROPERTIES.iter().chain(&IMAGE_PROPERTIES).copied().collect()
}

/// Object UUID for a node id. Ids that already are UUIDs pass through.
pub fn node_uuid(node_id: &str) -> Uuid {
    if node_id.len() == 36 {
        if let Ok(parsed) = Uuid::parse_str(node_id) {
            return parsed;
        }
    }
    Uuid::new_v5(&Uuid::NAMESPACE_URL, node_id.as_bytes())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub tenant: String,
    pub text_objects: usize,
    pub image_objects: usize,
    pub failed_objects: usize,
    pub references_added: usize,
    pub references_failed: usize,
}

pub struct IngestionWriter<'a> {
    store: &'a dyn VectorStore,
    text_collection: String,
    image_collection: String,
    batch_size: usize,
}

impl<'a> IngestionWriter<'a> {
    pub fn new(cfg: &Config, store: &'a dyn VectorStore) -> Self {
        Self {
            store,
            text_collection: cfg.store.text_collection.clone(),
            image_collection: cfg.store.image_collection.clone(),
            batch_size: cfg.store.batch_size.max(1),
        }
    }

    /// Creates both collections, their cross-references and the tenant.
    pub fn initialize_collections(&self, tenant: &str) -> Result<()> {
        let (text, image) = (&self.text_collection, &self.image_collection);
        self.store.ensure_collection(text, &text_schema())?;
        self.store.ensure_collection(image, &image_schema())?;
        self.store.ensure_reference_property(text, HAS_IMAGES, image)?;
        self.store.ensure_reference_property(image, BELONGS_TO_TEXT, text)?;
        self.store.ensure_tenant(text, tenant)?;
        self.store.ensure_tenant(image, tenant)?;
        Ok(())
    }

    /// Upserts every node, then links text and image objects both ways.
    ///
    /// `image_urls` maps image node ids to exported locations. Individual
    /// reference failures are logged and counted; they do not fail the call.
    pub fn ingest(
        &self,
        doc: &NodesDocument,
        user: Option<&str>,
        image_urls: &HashMap<String, String>,
    ) -> Result<IngestReport> {
        if doc.nodes.is_empty() {
            bail!("no nodes provided for ingestion");
        }
        let Some(tenant) = resolve_user(doc, user) else {
            bail!("no user found for ingestion");
        };
        info!(tenant = %tenant, nodes = doc.nodes.len(), "ingesting nodes");

        self.initialize_collections(&tenant)?;

        let mut report = IngestReport {
            tenant: tenant.clone(),
            ..Default::default()
        };

        let texts: Vec<StoreObject> = doc.text_nodes().map(|t| text_object(doc, t, &tenant)).collect();
        let images: Vec<StoreObject> = doc
            .image_nodes()
            .map(|i| image_object(doc, i, &tenant, image_urls.get(&i.id)))
            .collect();
        report.text_objects = texts.len();
        report.image_objects = images.len();

        for batch in texts.chunks(self.batch_size) {
            report.failed_objects +=
                self.store
                    .upsert_objects(&self.text_collection, &tenant, batch)?;
        }
        for batch in images.chunks(self.batch_size) {
            report.failed_objects +=
                self.store
                    .upsert_objects(&self.image_collection, &tenant, batch)?;
        }

        for text in doc.text_nodes() {
            for image_id in &text.metadata.image_refs {
                self.link(
                    &mut report,
                    (self.text_collection.as_str(), text.id.as_str()),
                    HAS_IMAGES,
                    (self.image_collection.as_str(), image_id.as_str()),
                );
            }
        }
        for image in doc.image_nodes() {
            for rel in image.relationships.values() {
                self.link(
                    &mut report,
                    (self.image_collection.as_str(), image.id.as_str()),
                    BELONGS_TO_TEXT,
                    (self.text_collection.as_str(), rel.node_id.as_str()),
                );
            }
        }

        info!(
            text = report.text_objects,
            images = report.image_objects,
            failed = report.failed_objects,
            references = report.references_added,
            reference_failures = report.references_failed,
            "ingestion finished"
        );
        Ok(report)
    }

    fn link(
        &self,
        report: &mut IngestReport,
        from: (&str, &str),
        property: &str,
        to: (&str, &str),
    ) {
        let res = self.store.add_reference(
            from.0,
            &report.tenant,
            node_uuid(from.1),
            property,
            to.0,
            node_uuid(to.1),
        );
        match res {
            Ok(()) => report.references_added += 1,
            Err(err) => {
                report.references_failed += 1;
                warn!("failed to add {property} reference {} -> {}: {err:#}", from.1, to.1);
            }
        }
    }
}

/// Explicit user first, then the document's, then the first node carrying one.
pub fn resolve_user(doc: &NodesDocument, user: Option<&str>) -> Option<String> {
    user.map(str::to_string)
        .or_else(|| doc.user.clone())
        .or_else(|| {
            doc.nodes
                .iter()
                .find_map(|n| n.extra().get("user").and_then(Value::as_str).map(str::to_string))
        })
        .filter(|u| !u.trim().is_empty())
}

fn common_properties(
    doc: &NodesDocument,
    id: &str,
    extra: &BTreeMap<String, Value>,
    file_name: &str,
    page: Option<u32>,
    tenant: &str,
) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("file_name".into(), json!(file_name));
    if let Some(page) = page {
        props.insert("page".into(), json!(page));
    }
    let sha = extra
        .get("file_sha256")
        .cloned()
        .or_else(|| doc.file_sha256.clone().map(Value::String));
    if let Some(sha) = sha {
        props.insert("file_sha256".into(), sha);
    }
    props.insert("user".into(), json!(tenant));
    props.insert(
        "source_mime".into(),
        extra.get("source_mime").cloned().unwrap_or_else(|| json!(doc.source_mime)),
    );
    props.insert(
        "total_nodes".into(),
        extra.get("total_nodes").cloned().unwrap_or_else(|| json!(doc.nodes.len())),
    );
    props.insert("chunk_id".into(), json!(id));
    props
}

fn text_object(doc: &NodesDocument, text: &TextNode, tenant: &str) -> StoreObject {
    let mut properties = common_properties(
        doc,
        &text.id,
        &text.metadata.extra,
        &text.metadata.file_name,
        text.metadata.page,
        tenant,
    );
    properties.insert("text".into(), json!(text.text));
    properties.insert("char_start".into(), json!(text.metadata.char_start));
    properties.insert("char_len".into(), json!(text.metadata.char_len));
    properties.insert("is_complex".into(), json!(text.metadata.is_complex));
    properties.insert("has_tables".into(), json!(text.metadata.has_tables));
    properties.insert("image_refs".into(), json!(text.metadata.image_refs));
    StoreObject {
        uuid: node_uuid(&text.id),
        properties,
        vector: text.embedding.clone(),
    }
}

fn image_object(
    doc: &NodesDocument,
    image: &ImageNode,
    tenant: &str,
    url: Option<&String>,
) -> StoreObject {
    let mut properties = common_properties(
        doc,
        &image.id,
        &image.metadata.extra,
        &image.metadata.file_name,
        Some(image.metadata.page),
        tenant,
    );
    if let Some(url) = url {
        properties.insert("image_url".into(), json!(url));
    }
    StoreObject {
        uuid: node_uuid(&image.id),
        properties,
        vector: image.embedding.clone(),
    }
}
