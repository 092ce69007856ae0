//! Text and image nodes with deterministic ids and bidirectional links.

use crate::chunker::Chunk;
use crate::util::mime_for_file_name;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Relationship key linking an image node to its parent text node.
pub const PARENT_REL: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub node_id: String,
    pub node_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextMetadata {
    pub file_name: String,
    pub char_start: usize,
    pub char_len: usize,
    pub is_complex: bool,
    pub has_tables: bool,
    pub image_refs: Vec<String>,
    /// 1-based; absent for chunks without a page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// File-level fields added before ingestion.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub file_name: String,
    pub page: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    #[serde(rename = "id_")]
    pub id: String,
    pub text: String,
    pub metadata: TextMetadata,
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNode {
    #[serde(rename = "id_")]
    pub id: String,
    /// Base64 image payload.
    pub image: String,
    pub metadata: ImageMetadata,
    pub relationships: BTreeMap<String, Relationship>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl ImageNode {
    /// Id of the text node this image belongs to.
    pub fn parent_id(&self) -> Option<&str> {
        self.relationships.get(PARENT_REL).map(|r| r.node_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Text(TextNode),
    Image(ImageNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Text(n) => &n.id,
            Node::Image(n) => &n.id,
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Node::Text(n) => n.embedding.as_deref(),
            Node::Image(n) => n.embedding.as_deref(),
        }
    }

    pub fn extra_mut(&mut self) -> &mut BTreeMap<String, Value> {
        match self {
            Node::Text(n) => &mut n.metadata.extra,
            Node::Image(n) => &mut n.metadata.extra,
        }
    }

    pub fn extra(&self) -> &BTreeMap<String, Value> {
        match self {
            Node::Text(n) => &n.metadata.extra,
            Node::Image(n) => &n.metadata.extra,
        }
    }
}

/// The serialized artifact handed to ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesDocument {
    #[serde(default)]
    pub file_sha256: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    pub source_mime: String,
    pub total_nodes: usize,
    pub nodes: Vec<Node>,
}

impl NodesDocument {
    pub fn text_nodes(&self) -> impl Iterator<Item = &TextNode> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Text(t) => Some(t),
            Node::Image(_) => None,
        })
    }

    pub fn image_nodes(&self) -> impl Iterator<Item = &ImageNode> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Image(i) => Some(i),
            Node::Text(_) => None,
        })
    }
}

fn sha_suffix(file_sha256: Option<&str>) -> &str {
    match file_sha256 {
        Some(sha) if sha.len() >= 4 && sha.is_char_boundary(sha.len() - 4) => &sha[sha.len() - 4..],
        _ => "0000",
    }
}

/// Builds nodes in chunk order, each text node followed by its images.
///
/// Text ids count per page; image ids count across the whole document.
pub fn extract_nodes(chunks: &[Chunk], file_sha256: Option<&str>) -> Vec<Node> {
    let sha4 = sha_suffix(file_sha256);
    let mut per_page: HashMap<u32, usize> = HashMap::new();
    let mut image_seq = 0usize;
    let mut nodes = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let page = chunk.source_page.unwrap_or(0);
        let seq = per_page.entry(page).or_insert(0);
        *seq += 1;
        let text_id = format!("txt_{sha4}_p{page:02}_c{seq:02}");

        let mut images = Vec::with_capacity(chunk.metadata.images.len());
        for record in &chunk.metadata.images {
            image_seq += 1;
            let id = format!("img_{sha4}_p{:02}_i{image_seq:02}", record.page_number);
            let parent = Relationship {
                node_id: text_id.clone(),
                node_type: PARENT_REL.to_string(),
            };
            images.push(ImageNode {
                id,
                image: record.base64.clone(),
                metadata: ImageMetadata {
                    file_name: chunk.metadata.file_name.clone(),
                    page: record.page_number,
                    extra: BTreeMap::new(),
                },
                relationships: BTreeMap::from([(PARENT_REL.to_string(), parent)]),
                embedding: None,
            });
        }

        nodes.push(Node::Text(TextNode {
            id: text_id,
            text: chunk.content.clone(),
            metadata: TextMetadata {
                file_name: chunk.metadata.file_name.clone(),
                char_start: chunk.char_start,
                char_len: chunk.content.len(),
                is_complex: chunk.metadata.document_complex,
                has_tables: chunk.metadata.has_tables,
                image_refs: images.iter().map(|i| i.id.clone()).collect(),
                page: chunk.source_page.filter(|p| *p > 0),
                extra: BTreeMap::new(),
            },
            relationships: BTreeMap::new(),
            embedding: None,
        }));
        nodes.extend(images.into_iter().map(Node::Image));
    }

    nodes
}

pub fn create_nodes_document(
    chunks: &[Chunk],
    file_name: &str,
    file_sha256: Option<&str>,
    user: Option<&str>,
) -> NodesDocument {
    let nodes = extract_nodes(chunks, file_sha256);
    NodesDocument {
        file_sha256: file_sha256.map(str::to_string),
        user: user.map(str::to_string),
        source_mime: mime_for_file_name(file_name).to_string(),
        total_nodes: nodes.len(),
        nodes,
    }
}

/// Every `image_refs` entry names an image node whose parent is the referring
/// text node, and every image's parent lists it. Returns the violations.
pub fn check_referential_symmetry(nodes: &[Node]) -> Vec<String> {
    let mut texts: HashMap<&str, &TextNode> = HashMap::new();
    let mut images: HashMap<&str, &ImageNode> = HashMap::new();
    for node in nodes {
        match node {
            Node::Text(t) => {
                texts.insert(&t.id, t);
            }
            Node::Image(i) => {
                images.insert(&i.id, i);
            }
        }
    }

    let mut problems = Vec::new();
    for text in texts.values() {
        for image_id in &text.metadata.image_refs {
            match images.get(image_id.as_str()) {
                None => problems.push(format!("{} references missing image {image_id}", text.id)),
                Some(image) if image.parent_id() != Some(text.id.as_str()) => problems.push(
                    format!("{image_id} is referenced by {} but has another parent", text.id),
                ),
                Some(_) => {}
            }
        }
    }
    for image in images.values() {
        match image.parent_id().and_then(|p| texts.get(p)) {
            None => problems.push(format!("{} has no parent text node", image.id)),
            Some(text) if !text.metadata.image_refs.iter().any(|r| *r == image.id) => {
                problems.push(format!("{} is not listed by its parent {}", image.id, text.id))
            }
            Some(_) => {}
        }
    }
    problems.sort();
    problems
}
