//! PDF rasterization via poppler's `pdftoppm`.

use crate::config::OcrConfig;
use crate::{NeonError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

/// Renders PDF pages to PNG images.
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    binary: PathBuf,
    dpi: u32,
}

impl Default for PdfRasterizer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
            dpi: OcrConfig::PDF_RENDER_DPI,
        }
    }
}

impl PdfRasterizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Render every page of `pdf` and return the PNG bytes in page order.
    pub async fn rasterize(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>> {
        let workdir = TempDir::new()?;
        let input = workdir.path().join("input.pdf");
        let prefix = workdir.path().join("page");
        tokio::fs::write(&input, pdf)
            .await
            .map_err(|e| NeonError::io_with_path(e, &input))?;

        let dpi = self.dpi.to_string();
        let output = Command::new(&self.binary)
            .arg("-png")
            .args(["-r", &dpi])
            .arg(&input)
            .arg(&prefix)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| NeonError::OcrUnavailable {
                message: format!("{} is not runnable: {}", self.binary.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NeonError::Ocr {
                message: format!("PDF conversion failed: {}", stderr.trim()),
            });
        }

        let pages = collect_pages(workdir.path()).await?;
        debug!("Rendered {} PDF page(s) at {} dpi", pages.len(), self.dpi);

        let mut images = Vec::with_capacity(pages.len());
        for (_, path) in pages {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| NeonError::io_with_path(e, &path))?;
            images.push(bytes);
        }
        Ok(images)
    }
}

/// `page-N.png` files in `dir`, sorted by `N`. pdftoppm zero-pads `N`
/// depending on the page count, so ordering is numeric.
async fn collect_pages(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| NeonError::io_with_path(e, dir))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let number = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("page-"))
            .and_then(|rest| rest.strip_suffix(".png"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(number) = number {
            pages.push((number, path));
        }
    }

    pages.sort_by_key(|(number, _)| *number);
    Ok(pages)
}
