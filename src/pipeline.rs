use crate::{
    chunker::{Chunk, ChunkSource, DocumentChunker},
    config::Config,
    embed::{Embedder, add_embeddings, add_file_metadata},
    engine::Converter,
    images::{export_images, exported_urls},
    ingest::{IngestReport, IngestionWriter, resolve_user},
    nodes::{NodesDocument, check_referential_symmetry, create_nodes_document},
    processor::Processor,
    report::ProcessedDocument,
    store::VectorStore,
    util::{hash_file, user_from_path},
};
use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Process, chunk and build nodes for one input file.
pub struct Pipeline<C: Converter> {
    cfg: Config,
    processor: Processor<C>,
}

pub struct JobOutput {
    pub processed: ProcessedDocument,
    pub chunks: Vec<Chunk>,
    pub nodes: NodesDocument,
}

impl<C: Converter> Pipeline<C> {
    pub fn new(cfg: &Config, engine: C) -> Self {
        Self {
            cfg: cfg.clone(),
            processor: Processor::new(cfg, engine),
        }
    }

    pub fn processor(&self) -> &Processor<C> {
        &self.processor
    }

    /// `user` defaults to the one encoded in the input path.
    pub fn build_nodes(&self, input: &Path, user: Option<&str>) -> Result<JobOutput> {
        let processed = self
            .processor
            .process_document(input)
            .ok_or_else(|| anyhow!("document processing failed: {}", input.display()))?;

        let chunks =
            DocumentChunker::from_config(&self.cfg).chunk(ChunkSource::from(&processed));
        info!(chunks = chunks.len(), "chunking complete");

        let sha = match hash_file(input) {
            Ok(sha) => Some(sha),
            Err(err) => {
                warn!("hashing input failed: {err:#}");
                None
            }
        };
        let user = user
            .map(str::to_string)
            .unwrap_or_else(|| user_from_path(&input.display().to_string()));

        let mut nodes =
            create_nodes_document(&chunks, &processed.file.file_name, sha.as_deref(), Some(&user));
        let problems = check_referential_symmetry(&nodes.nodes);
        if !problems.is_empty() {
            bail!("node references are inconsistent: {}", problems.join("; "));
        }
        add_file_metadata(&mut nodes);
        info!(nodes = nodes.total_nodes, "nodes document built");

        Ok(JobOutput {
            processed,
            chunks,
            nodes,
        })
    }
}

pub fn write_nodes(doc: &NodesDocument, path: &Path, pretty: bool) -> Result<()> {
    let raw = if pretty {
        serde_json::to_string_pretty(doc)?
    } else {
        serde_json::to_string(doc)?
    };
    std::fs::write(path, raw).with_context(|| format!("writing nodes: {}", path.display()))
}

pub fn read_nodes(path: &Path) -> Result<NodesDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading nodes: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing nodes: {}", path.display()))
}

/// Image export, embedding and vector store writes for a nodes document.
pub struct Ingestor<'a> {
    pub cfg: &'a Config,
    pub embedder: Option<&'a dyn Embedder>,
    pub store: &'a dyn VectorStore,
}

impl Ingestor<'_> {
    /// Exports images under `image_dir` when configured, embeds if an
    /// embedder is set, then writes to the store.
    pub fn run(
        &self,
        doc: &mut NodesDocument,
        user: Option<&str>,
        image_dir: Option<&Path>,
    ) -> Result<IngestReport> {
        let tenant = resolve_user(doc, user).ok_or_else(|| anyhow!("no user found for ingestion"))?;

        let urls = match image_dir.filter(|_| self.cfg.images.write_images) {
            Some(dir) => {
                let images: Vec<_> = doc.image_nodes().collect();
                let results =
                    export_images(&images, &tenant, dir, self.cfg.images.upload_workers)?;
                exported_urls(&images, &results)
            }
            None => HashMap::new(),
        };

        if let Some(embedder) = self.embedder {
            let dims = (self.cfg.embedding.dimensions > 0).then_some(self.cfg.embedding.dimensions);
            add_embeddings(doc, embedder, self.cfg.embedding.batch_size, dims)?;
        }

        IngestionWriter::new(self.cfg, self.store).ingest(doc, Some(&tenant), &urls)
    }
}
