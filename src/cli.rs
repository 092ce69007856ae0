use crate::{
    config::Config,
    embed::{Embedder, HttpEmbedder},
    engine::{Converter, python::PythonEngine},
    ingest::IngestReport,
    nodes::NodesDocument,
    pipeline::{Ingestor, Pipeline, read_nodes, write_nodes},
    processor::Processor,
    store::weaviate::WeaviateStore,
    util::{ensure_dir, file_name_of, hash_file, nodes_file_name, now_rfc3339, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docling-ingest")]
#[command(about = "Adaptive two-pass document ingestion (Docling triage + chunking + vector store)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./docling-ingest.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Doctor {},
    /// Cheap pass and per-page complexity labels.
    Triage {
        #[arg(long)]
        input: PathBuf,
    },
    /// Convert a document and print a summary.
    Process {
        #[arg(long)]
        input: PathBuf,
    },
    /// Convert, chunk and write the nodes document.
    Chunk {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Embed and write an existing nodes document to the vector store.
    Ingest {
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long)]
        user: Option<String>,
    },
    /// Everything: chunk, export images, embed and ingest.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            doctor(&cfg)
        }
        Command::Triage { input } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            triage(&cfg, input)
        }
        Command::Process { input } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            process(&cfg, input)
        }
        Command::Chunk {
            input,
            user,
            out_dir,
        } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            chunk(&cfg, input, user.as_deref(), out_dir.as_deref())
        }
        Command::Ingest { nodes, user } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            ingest(&cfg, nodes, user.as_deref())
        }
        Command::Run {
            input,
            user,
            out_dir,
        } => run(&args, &cfg, input, user.as_deref(), out_dir.as_deref()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("docling-ingest.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = PythonEngine::new(cfg)?;
    let diag = engine.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn triage(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(cfg, input)?;
    let processor = Processor::new(cfg, PythonEngine::new(cfg)?);
    let result = processor.triage(input)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "triage": result,
        }))?
    );
    Ok(())
}

/// Prints a summary; conversion failure prints `Failed` without an error exit.
fn process(cfg: &Config, input: &Path) -> Result<()> {
    if cfg.security.reject_url_inputs && looks_like_url(&input.display().to_string()) {
        return Err(anyhow!("URL inputs are disabled: {}", input.display()));
    }
    let processor = Processor::new(cfg, PythonEngine::new(cfg)?);
    match processor.process_document(input) {
        Some(doc) => {
            let m = &doc.metadata;
            println!(
                "Successfully processed {} pages in {:.2}s",
                m.page_count, m.processing_time
            );
            println!("  Enhanced pages: {}", m.complex_pages);
            println!("  Images found: {}", m.images_found);
            println!("  Tables found: {}", m.tables_found);
        }
        None => println!("Failed"),
    }
    Ok(())
}

fn chunk(cfg: &Config, input: &Path, user: Option<&str>, out_dir: Option<&Path>) -> Result<()> {
    validate_input(cfg, input)?;
    let pipeline = Pipeline::new(cfg, PythonEngine::new(cfg)?);
    let job = pipeline.build_nodes(input, user)?;

    let out = out_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    ensure_dir(&out)?;
    let path = out.join(nodes_file_name(&job.processed.file.file_name));
    write_nodes(&job.nodes, &path, cfg.output.pretty_json)?;
    println!("{}", path.display());
    Ok(())
}

fn embedder(cfg: &Config) -> Result<Option<HttpEmbedder>> {
    if !cfg.embedding.enabled {
        return Ok(None);
    }
    HttpEmbedder::new(cfg).map(Some)
}

fn ingest(cfg: &Config, nodes: &Path, user: Option<&str>) -> Result<()> {
    let mut doc = read_nodes(nodes)?;
    let store = WeaviateStore::new(cfg)?;
    let embedder = embedder(cfg)?;
    let ingestor = Ingestor {
        cfg,
        embedder: embedder.as_ref().map(|e| e as &dyn Embedder),
        store: &store,
    };
    let image_dir = nodes.parent().map(Path::to_path_buf);
    let report = ingestor.run(&mut doc, user, image_dir.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run(
    args: &Args,
    cfg: &Config,
    input: &Path,
    user: Option<&str>,
    out_override: Option<&Path>,
) -> Result<()> {
    validate_input(cfg, input)?;

    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let input_hash =
        hash_file(input).with_context(|| format!("hashing input: {}", input.display()))?;
    let job_id = sha256_hex(format!("{cfg_hash}:{input_hash}").as_bytes());

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let job_dir = out_root.join(&job_id);
    ensure_dir(&job_dir)?;
    ensure_dir(&job_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("job_id={job_id} out={}", job_dir.display());

    if cfg.debug.dump_effective_config {
        std::fs::write(
            job_dir.join("effective-config.toml"),
            cfg.normalized_for_hash(),
        )?;
    }
    ensure_dir(Path::new(&cfg.paths.work_dir))?;

    let started = now_rfc3339();
    let pipeline = Pipeline::new(cfg, PythonEngine::new(cfg)?);
    let mut job = pipeline.build_nodes(input, user)?;

    if cfg.output.write_markdown {
        std::fs::write(
            job_dir.join(&cfg.output.markdown_filename),
            &job.processed.markdown,
        )?;
    }
    let nodes_name = nodes_file_name(&file_name_of(input));
    let nodes_path = job_dir.join(&nodes_name);
    if cfg.output.write_nodes_json {
        write_nodes(&job.nodes, &nodes_path, cfg.output.pretty_json)?;
    }

    let ingest_state = if cfg.store.enabled {
        match ingest_job(cfg, &mut job.nodes, &job_dir) {
            Ok(report) => serde_json::json!({ "status": "ingested", "report": report }),
            Err(err) => {
                error!("ingestion failed: {err:#}");
                serde_json::json!({ "status": "embedding_failed", "error": format!("{err:#}") })
            }
        }
    } else {
        warn!("store disabled; skipping ingestion");
        serde_json::json!({ "status": "skipped" })
    };

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "job_id": job_id,
            "input": input,
            "started": started,
            "finished": now_rfc3339(),
            "markdown": cfg.output.markdown_filename,
            "nodes": nodes_name,
            "processing": job.processed.metadata,
            "chunks": job.chunks.len(),
            "ingest": ingest_state,
        });
        std::fs::write(
            job_dir.join("index.json"),
            serde_json::to_string_pretty(&index)?,
        )?;
    }

    info!("done");
    Ok(())
}

fn ingest_job(cfg: &Config, nodes: &mut NodesDocument, job_dir: &Path) -> Result<IngestReport> {
    let store = WeaviateStore::new(cfg)?;
    let embedder = embedder(cfg)?;
    let ingestor = Ingestor {
        cfg,
        embedder: embedder.as_ref().map(|e| e as &dyn Embedder),
        store: &store,
    };
    ingestor.run(nodes, None, Some(job_dir))
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn resolve_log_path(cfg: &Config, job_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(job_dir) = job_dir {
        return Some(job_dir.join("logs").join("docling-ingest.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("docling-ingest.log"))
}
