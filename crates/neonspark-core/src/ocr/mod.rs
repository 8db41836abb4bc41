//! Optical character recognition.
//!
//! Recognition sits behind [`OcrEngine`] so the document pipeline can run
//! against Tesseract in production and a stub in tests.

mod pdf;
mod preprocess;
mod tesseract;

pub use pdf::PdfRasterizer;
pub use preprocess::{binarize, median_filter_3x3, otsu_threshold, preprocess};
pub use tesseract::{check_tessdata, detect_version, TessdataStatus, TesseractOcr};

use crate::Result;
use async_trait::async_trait;

/// Turns an image into text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine name, e.g. `"tesseract"`.
    fn name(&self) -> &str;

    /// Version string reported by the engine.
    fn version(&self) -> &str;

    /// Recognize the text in an encoded image.
    async fn image_to_text(&self, image: &[u8]) -> Result<String>;
}
