//! Embedding attachment for nodes documents.

use crate::config::Config;
use crate::nodes::{Node, NodesDocument};
use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

/// Turns a batch of inputs into vectors, index-aligned with the inputs.
///
/// Image inputs are `data:` URLs.
pub trait Embedder {
    fn embed(&self, inputs: &[String], modality: Modality) -> Result<Vec<Vec<f32>>>;
}

/// Copies document-level fields onto every node's metadata.
pub fn add_file_metadata(doc: &mut NodesDocument) {
    let total = doc.nodes.len();
    doc.total_nodes = total;
    let sha = doc.file_sha256.clone();
    let user = doc.user.clone();
    let mime = doc.source_mime.clone();
    for node in &mut doc.nodes {
        let extra = node.extra_mut();
        if let Some(sha) = &sha {
            extra.insert("file_sha256".into(), Value::String(sha.clone()));
        }
        if let Some(user) = &user {
            extra.insert("user".into(), Value::String(user.clone()));
        }
        extra.insert("source_mime".into(), Value::String(mime.clone()));
        extra.insert("total_nodes".into(), Value::from(total));
    }
}

/// Embeds every text node with non-blank text and every image node.
///
/// Nodes that already carry an embedding are left alone. When `dimensions`
/// is given, a vector of any other length is an error.
pub fn add_embeddings(
    doc: &mut NodesDocument,
    embedder: &dyn Embedder,
    batch_size: usize,
    dimensions: Option<usize>,
) -> Result<usize> {
    let batch_size = batch_size.max(1);
    let mut text_idx = Vec::new();
    let mut text_in = Vec::new();
    let mut image_idx = Vec::new();
    let mut image_in = Vec::new();

    for (i, node) in doc.nodes.iter().enumerate() {
        if node.embedding().is_some() {
            continue;
        }
        match node {
            Node::Text(t) if !t.text.trim().is_empty() => {
                text_idx.push(i);
                text_in.push(t.text.clone());
            }
            Node::Text(_) => {}
            Node::Image(img) => {
                image_idx.push(i);
                image_in.push(image_data_url(&img.image));
            }
        }
    }

    let mut embedded = 0;
    for (indices, inputs, modality) in [
        (text_idx, text_in, Modality::Text),
        (image_idx, image_in, Modality::Image),
    ] {
        for (idx_batch, in_batch) in indices.chunks(batch_size).zip(inputs.chunks(batch_size)) {
            let vectors = embedder
                .embed(in_batch, modality)
                .with_context(|| format!("embedding {} {modality:?} inputs", in_batch.len()))?;
            if vectors.len() != in_batch.len() {
                return Err(anyhow!(
                    "embedder returned {} vectors for {} inputs",
                    vectors.len(),
                    in_batch.len()
                ));
            }
            for (&i, vector) in idx_batch.iter().zip(vectors) {
                if let Some(want) = dimensions {
                    if vector.len() != want {
                        return Err(anyhow!(
                            "embedding dimension mismatch for {}: got {}, want {want}",
                            doc.nodes[i].id(),
                            vector.len()
                        ));
                    }
                }
                match &mut doc.nodes[i] {
                    Node::Text(t) => t.embedding = Some(vector),
                    Node::Image(img) => img.embedding = Some(vector),
                }
                embedded += 1;
            }
        }
    }

    info!("embedded {embedded} nodes");
    Ok(embedded)
}

/// MIME type of a base64 image, sniffed from its leading bytes.
pub fn sniff_image_mime(b64: &str) -> &'static str {
    // Whole 4-char groups only, enough for the longest signature below.
    let raw = b64.trim().as_bytes();
    let head = &raw[..raw.len().min(24) / 4 * 4];
    let bytes = STANDARD.decode(head).unwrap_or_default();
    match bytes.as_slice() {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => "image/tiff",
        _ => "image/png",
    }
}

pub fn image_data_url(b64: &str) -> String {
    format!("data:{};base64,{b64}", sniff_image_mime(b64))
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(cfg: &Config) -> Result<Self> {
        let e = &cfg.embedding;
        let client = Client::builder()
            .user_agent(concat!("docling-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(e.timeout_seconds))
            .build()
            .with_context(|| "building embedding http client")?;
        let api_key = std::env::var(&e.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("{} is not set; calling embeddings without auth", e.api_key_env);
        }
        Ok(Self {
            client,
            endpoint: e.endpoint.trim_end_matches('/').to_string(),
            model: e.model.clone(),
            api_key,
            dimensions: e.dimensions,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, inputs: &[String], modality: Modality) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = inputs.len(), ?modality, "embedding batch");
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: (self.dimensions > 0).then_some(self.dimensions),
        };
        let mut req = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().with_context(|| "embedding request")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(anyhow!("embedding request failed: HTTP {status}: {text}"));
        }
        let mut parsed: EmbeddingResponse =
            resp.json().with_context(|| "decoding embedding response")?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
