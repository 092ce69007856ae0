use super::{Converter, types::*};
use crate::config::{Config, PassOptions};
use crate::page_extract::PageStream;
use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RUNNER_SCRIPT: &str = "docling_runner.py";

/// Docling behind a Python subprocess speaking JSON over stdin/stdout.
pub struct PythonEngine {
    cfg: Config,
    script: PathBuf,
    python_exe: PathBuf,
}

impl PythonEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        let script = scripts_dir.join(RUNNER_SCRIPT);
        if !script.exists() {
            return Err(anyhow!("missing script: {}", script.display()));
        }
        let python_exe = resolve_python_exe(&cfg.engine.python_exe);
        Ok(Self {
            cfg: cfg.clone(),
            script,
            python_exe,
        })
    }

    fn options_for(&self, mode: ConvertMode) -> PassOptions {
        match mode {
            ConvertMode::Cheap => self.cfg.cheap_pass.clone(),
            ConvertMode::HighFidelity => self.cfg.high_fidelity_pass.clone(),
            ConvertMode::Default => self.cfg.default_pass.clone(),
        }
    }

    fn request(&self, cmd: &str, mode: ConvertMode) -> ConvertIn {
        ConvertIn {
            cmd: cmd.to_string(),
            input: None,
            streams: Vec::new(),
            options: self.options_for(mode),
            num_threads: self.cfg.engine.num_threads,
            device: self.cfg.engine.device.clone(),
        }
    }

    fn convert_timeout(&self) -> Option<u64> {
        (self.cfg.engine.convert_timeout_seconds > 0)
            .then_some(self.cfg.engine.convert_timeout_seconds)
    }

    fn run_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        input: &I,
        timeout_seconds: Option<u64>,
    ) -> Result<O> {
        debug!(
            "python run {} timeout={:?}",
            self.script.display(),
            timeout_seconds
        );
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.script);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        for (k, v) in &self.cfg.engine.env {
            cmd.env(k, v);
        }
        if !self.cfg.paths.docling_artifacts_dir.is_empty() {
            cmd.env("DOCLING_ARTIFACTS_PATH", &self.cfg.paths.docling_artifacts_dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning python: {}", self.script.display()))?;

        let bytes = serde_json::to_vec(input)?;
        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        // Large page batches exceed the pipe buffer; write from a separate thread
        // so the child can drain stdout while we are still feeding it.
        let writer = std::thread::spawn(move || -> Result<()> {
            stdin.write_all(&bytes).with_context(|| "write stdin")?;
            stdin.flush().ok();
            Ok(())
        });

        let output = match timeout_seconds {
            Some(secs) => wait_with_timeout(&mut child, Duration::from_secs(secs))?,
            None => child
                .wait_with_output()
                .with_context(|| "waiting for python")?,
        };
        writer
            .join()
            .map_err(|_| anyhow!("stdin writer thread panicked"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "python script failed: {}\n{}",
                self.script.display(),
                stderr
            ));
        }

        if self.cfg.debug.keep_python_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("python stderr: {}", stderr.trim());
        }

        let out: O = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing python JSON output: {}", self.script.display()))?;
        Ok(out)
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("DOCLING_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl Converter for PythonEngine {
    fn doctor(&self) -> Result<EngineDiag> {
        self.run_json::<serde_json::Value, EngineDiag>(
            &serde_json::json!({"cmd": "doctor"}),
            Some(self.cfg.engine.doctor_timeout_seconds),
        )
    }

    fn convert(&self, input: &Path, mode: ConvertMode) -> Result<ConvertedDocument> {
        let mut req = self.request("convert", mode);
        req.input = Some(input.display().to_string());
        let out: ConvertOut = self.run_json(&req, self.convert_timeout())?;
        for w in &out.warnings {
            warn!(?mode, "docling: {w}");
        }
        if !out.ok {
            let msg = out.error.unwrap_or_else(|| "docling convert failed".to_string());
            return Err(anyhow!(msg));
        }
        out.document
            .ok_or_else(|| anyhow!("docling returned no document for {}", input.display()))
    }

    fn convert_streams(
        &self,
        streams: &[PageStream],
        mode: ConvertMode,
    ) -> Result<Vec<Option<ConvertedDocument>>> {
        let mut req = self.request("convert_streams", mode);
        req.streams = streams
            .iter()
            .map(|s| StreamIn {
                name: s.name.clone(),
                base64: STANDARD.encode(&s.bytes),
            })
            .collect();
        let out: ConvertStreamsOut = self.run_json(&req, self.convert_timeout())?;
        for w in &out.warnings {
            warn!(?mode, "docling: {w}");
        }
        if !out.ok {
            let msg = out
                .error
                .unwrap_or_else(|| "docling stream convert failed".to_string());
            return Err(anyhow!(msg));
        }
        let mut docs = out.documents;
        if docs.len() != streams.len() {
            warn!(
                "docling returned {} results for {} streams",
                docs.len(),
                streams.len()
            );
            docs.resize(streams.len(), None);
        }
        Ok(docs)
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: Option<R>,
    what: &'static str,
) -> JoinHandle<Result<Vec<u8>>> {
    std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            r.read_to_end(&mut buf)
                .with_context(|| format!("read {what}"))?;
        }
        Ok(buf)
    })
}

fn join_reader(handle: JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("pipe reader thread panicked"))?
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain both pipes while waiting; docling logs heavily to stderr.
    let stdout_thread = spawn_reader(child.stdout.take(), "stdout");
    let stderr_thread = spawn_reader(child.stderr.take(), "stderr");

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            return Ok(Output {
                status,
                stdout: join_reader(stdout_thread)?,
                stderr: join_reader(stderr_thread)?,
            });
        }

        if start.elapsed() > timeout {
            warn!("python process timed out after {:?}", timeout);
            let _ = child.kill();
            child.wait().with_context(|| "wait after kill")?;
            let _ = join_reader(stdout_thread);
            let stderr = join_reader(stderr_thread).unwrap_or_default();
            return Err(anyhow!(
                "python process exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr)
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_python_is_used_verbatim() {
        assert_eq!(
            resolve_python_exe("/opt/venv/bin/python"),
            PathBuf::from("/opt/venv/bin/python")
        );
    }

    #[test]
    fn missing_runner_script_is_an_error() {
        let mut cfg = Config::default();
        cfg.paths.scripts_dir = "/nonexistent/scripts".into();
        let err = PythonEngine::new(&cfg).err().map(|e| e.to_string());
        assert!(err.unwrap_or_default().contains("missing script"));
    }

    #[test]
    fn passes_map_to_config_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RUNNER_SCRIPT), "").unwrap();
        let mut cfg = Config::default();
        cfg.paths.scripts_dir = dir.path().display().to_string();
        let engine = PythonEngine::new(&cfg).unwrap();

        assert!(!engine.options_for(ConvertMode::Cheap).do_table_structure);
        assert!(engine.options_for(ConvertMode::HighFidelity).generate_picture_images);
        assert!(engine.options_for(ConvertMode::Default).engine_defaults);

        let req = engine.request("convert", ConvertMode::HighFidelity);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["cmd"], "convert");
        assert_eq!(json["options"]["do_table_structure"], true);
    }
}
