use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use time::format_description::well_known::Rfc3339;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Full-content SHA-256 of a file, streamed in 1 MiB blocks.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open file: {}", path.display()))?;
    let mut h = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(format!("{:x}", h.finalize()))
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

/// MIME type by file extension; unknown or missing names map to octet-stream.
pub fn mime_for_file_name(file_name: &str) -> &'static str {
    if file_name.is_empty() || file_name == "unknown" {
        return "application/octet-stream";
    }
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/docx",
        "xlsx" => "application/xlsx",
        "pptx" => "application/pptx",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tiff" | "tif" => "image/tiff",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Resolves the owning user from a blob-style path: `raw/<user>/<file>` or
/// `<user>/<file>`.
pub fn user_from_path(blob_path: &str) -> String {
    let parts: Vec<&str> = blob_path.split('/').collect();
    let user = match parts.as_slice() {
        ["raw", user, _, ..] => *user,
        [user, _, ..] => *user,
        _ => "",
    };
    if user.is_empty() {
        "unknown".to_string()
    } else {
        user.to_string()
    }
}

/// Output name for a nodes document: `report.pdf` becomes `report_pdf_nodes.json`.
pub fn nodes_file_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{ext}_nodes.json"),
        None => format!("{file_name}_nodes.json"),
    }
}
