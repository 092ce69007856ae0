use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub cheap_pass: PassOptions,
    #[serde(default = "PassOptions::high_fidelity")]
    pub high_fidelity_pass: PassOptions,
    #[serde(default = "PassOptions::engine_default")]
    pub default_pass: PassOptions,
    #[serde(default)]
    pub processing: Processing,
    #[serde(default)]
    pub postprocess: Postprocess,
    #[serde(default)]
    pub chunking: Chunking,
    #[serde(default)]
    pub embedding: Embedding,
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// The effective configuration rendered back to TOML.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Default::default(),
            engine: Default::default(),
            cheap_pass: Default::default(),
            high_fidelity_pass: PassOptions::high_fidelity(),
            default_pass: PassOptions::engine_default(),
            processing: Default::default(),
            postprocess: Default::default(),
            chunking: Default::default(),
            embedding: Default::default(),
            store: Default::default(),
            images: Default::default(),
            output: Default::default(),
            logging: Default::default(),
            debug: Default::default(),
            security: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    pub work_dir: String,
    pub scripts_dir: String,
    pub docling_artifacts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            work_dir: ".docling-ingest-work".into(),
            scripts_dir: "scripts".into(),
            docling_artifacts_dir: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub python_exe: String,
    pub convert_timeout_seconds: u64,
    pub doctor_timeout_seconds: u64,
    pub num_threads: u32,
    pub device: String,
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            convert_timeout_seconds: 900,
            doctor_timeout_seconds: 60,
            num_threads: 8,
            device: "AUTO".into(),
            env: Default::default(),
        }
    }
}

/// Docling pipeline switches for one conversion mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassOptions {
    pub do_table_structure: bool,
    pub generate_picture_images: bool,
    pub generate_page_images: bool,
    pub do_ocr: bool,
    pub images_scale: f32,
    /// Leave every pipeline option at the engine's defaults.
    pub engine_defaults: bool,
}
impl Default for PassOptions {
    fn default() -> Self {
        Self {
            do_table_structure: false,
            generate_picture_images: false,
            generate_page_images: false,
            do_ocr: false,
            images_scale: 1.0,
            engine_defaults: false,
        }
    }
}
impl PassOptions {
    pub fn high_fidelity() -> Self {
        Self {
            do_table_structure: true,
            generate_picture_images: true,
            ..Self::default()
        }
    }

    pub fn engine_default() -> Self {
        Self {
            engine_defaults: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Processing {
    pub page_separator: String,
    pub error_fallback: String,
}
impl Default for Processing {
    fn default() -> Self {
        Self {
            page_separator: "\n---\n".into(),
            error_fallback: "Error processing page".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Postprocess {
    pub normalize_newlines: bool,
    pub normalize_unicode: bool,
    pub trim_trailing_whitespace: bool,
}
impl Default for Postprocess {
    fn default() -> Self {
        Self {
            normalize_newlines: true,
            normalize_unicode: false,
            trim_trailing_whitespace: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Chunking {
    pub chunk_size: usize,
    pub overlap: usize,
    pub min_section_chars: usize,
    pub caption_min_chars: usize,
    pub caption_match_ratio: f64,
    pub ocr_min_chars: usize,
    pub ocr_match_ratio: f64,
}
impl Default for Chunking {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            min_section_chars: 50,
            caption_min_chars: 10,
            caption_match_ratio: 0.7,
            ocr_min_chars: 20,
            ocr_match_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Embedding {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}
impl Default for Embedding {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:4000/v1".into(),
            model: "embed-v-4-0".into(),
            api_key_env: "EMBEDDING_API_KEY".into(),
            dimensions: 1536,
            batch_size: 64,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub enabled: bool,
    pub url: String,
    pub api_key_env: String,
    pub text_collection: String,
    pub image_collection: String,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}
impl Default for Store {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8080".into(),
            api_key_env: "WEAVIATE_API_KEY".into(),
            text_collection: "TextChunk".into(),
            image_collection: "ImageChunk".into(),
            batch_size: 100,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Images {
    pub write_images: bool,
    pub upload_workers: usize,
}
impl Default for Images {
    fn default() -> Self {
        Self {
            write_images: true,
            upload_workers: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_markdown: bool,
    pub write_nodes_json: bool,
    pub write_index_json: bool,
    pub markdown_filename: String,
    pub pretty_json: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_markdown: true,
            write_nodes_json: true,
            write_index_json: true,
            markdown_filename: "document.md".into(),
            pretty_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub keep_python_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_python_stderr: true,
            dump_effective_config: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub reject_url_inputs: bool,
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
            pin_scripts_dir: false,
        }
    }
}
