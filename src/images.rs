//! Writes image node payloads to disk on a bounded pool of worker threads.

use crate::nodes::ImageNode;
use crate::util::ensure_dir;
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn write_one(image: &ImageNode, dir: &Path) -> Result<PathBuf> {
    let bytes = STANDARD
        .decode(image.image.trim())
        .with_context(|| format!("decoding image {}", image.id))?;
    let path = dir.join(format!("{}.png", image.id));
    std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(path)
}

/// Exports every image to `<dir>/<tenant>/images/<node_id>.png`.
///
/// Results are index-aligned with `images`; one failure does not stop the
/// others. At most `workers` images are in flight at once.
pub fn export_images(
    images: &[&ImageNode],
    tenant: &str,
    dir: &Path,
    workers: usize,
) -> Result<Vec<Result<PathBuf>>> {
    let target = dir.join(tenant).join("images");
    ensure_dir(&target)?;
    if images.is_empty() {
        return Ok(Vec::new());
    }

    let workers = workers.clamp(1, images.len());
    let target = target.as_path();
    let mut slots: Vec<Option<Result<PathBuf>>> = images.iter().map(|_| None).collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                scope.spawn(move || {
                    (w..images.len())
                        .step_by(workers)
                        .map(|i| (i, write_one(images[i], target)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(done) => {
                    for (i, res) in done {
                        slots[i] = Some(res);
                    }
                }
                Err(_) => warn!("image export worker panicked"),
            }
        }
    });

    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.unwrap_or_else(|| Err(anyhow::anyhow!("image {} was not exported", images[i].id)))
        })
        .collect())
}

/// Node id to exported location for the images that made it to disk.
pub fn exported_urls(images: &[&ImageNode], results: &[Result<PathBuf>]) -> HashMap<String, String> {
    images
        .iter()
        .zip(results)
        .filter_map(|(img, res)| match res {
            Ok(path) => Some((img.id.clone(), path.display().to_string())),
            Err(err) => {
                warn!("image {} not exported: {err:#}", img.id);
                None
            }
        })
        .collect()
}
