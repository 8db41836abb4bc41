//! Document text extraction and generative analysis.

use crate::config::OcrConfig;
use crate::gemini::{GenerationConfig, Prompt, TextGenerator};
use crate::ocr::{preprocess, OcrEngine, PdfRasterizer};
use crate::upload::DocumentKind;
use crate::{NeonError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// OCR plus optional model-backed analysis of uploaded documents.
pub struct DocumentAnalyzer {
    ocr: Option<Arc<dyn OcrEngine>>,
    generator: Option<Arc<dyn TextGenerator>>,
    rasterizer: PdfRasterizer,
}

impl DocumentAnalyzer {
    pub fn new(
        ocr: Option<Arc<dyn OcrEngine>>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            ocr,
            generator,
            rasterizer: PdfRasterizer::default(),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: PdfRasterizer) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn ocr(&self) -> Option<&Arc<dyn OcrEngine>> {
        self.ocr.as_ref()
    }

    fn engine(&self) -> Result<&Arc<dyn OcrEngine>> {
        self.ocr.as_ref().ok_or_else(|| NeonError::OcrUnavailable {
            message: "OCR is not available: Tesseract was not found".to_string(),
        })
    }

    /// Clean the image up, then run OCR on it.
    pub async fn extract_text_from_image(&self, image: &[u8]) -> Result<String> {
        let engine = self.engine()?;
        let owned = image.to_vec();
        let cleaned = tokio::task::spawn_blocking(move || preprocess(&owned))
            .await
            .map_err(|e| NeonError::Other(format!("image preprocessing panicked: {}", e)))??;
        engine.image_to_text(&cleaned).await
    }

    /// OCR every page of a PDF, with a page break marker after each page.
    pub async fn extract_text_from_pdf(&self, pdf: &[u8]) -> Result<(String, usize)> {
        let engine = self.engine()?;
        let pages = self.rasterizer.rasterize(pdf).await?;

        let mut text = String::new();
        for (index, page) in pages.iter().enumerate() {
            debug!("OCR on PDF page {}", index + 1);
            text.push_str(&engine.image_to_text(page).await?);
            text.push_str(OcrConfig::PAGE_BREAK);
        }
        Ok((text, pages.len()))
    }

    /// Extract text from an upload, returning the page count for PDFs.
    pub async fn extract_text(
        &self,
        bytes: &[u8],
        kind: DocumentKind,
    ) -> Result<(String, Option<usize>)> {
        match kind {
            DocumentKind::Image => Ok((self.extract_text_from_image(bytes).await?, None)),
            DocumentKind::Pdf => {
                let (text, pages) = self.extract_text_from_pdf(bytes).await?;
                Ok((text, Some(pages)))
            }
        }
    }

    /// Ask the model for a summary, key points, recommendations, and the
    /// document's type and purpose.
    pub async fn analyze_content(&self, text: &str) -> Result<String> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| NeonError::unavailable("Gemini API key not configured"))?;

        info!("Analyzing {} characters of document text", text.len());
        generator
            .generate(&Prompt::text(analysis_prompt(text)), &GenerationConfig::default())
            .await
    }
}

fn analysis_prompt(text: &str) -> String {
    format!(
        "Analyze the following document content and provide:\n\
         1. A detailed summary\n\
         2. Key points and insights\n\
         3. Any relevant recommendations\n\
         4. Document type and purpose identification\n\
         \n\
         Content:\n\
         {}",
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct CountingOcr {
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl OcrEngine for CountingOcr {
        fn name(&self) -> &str {
            "counting"
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        async fn image_to_text(&self, image: &[u8]) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(image.len());
            Ok(format!("page {}", calls.len()))
        }
    }

    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        fn model(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &Prompt, config: &GenerationConfig) -> Result<String> {
            assert_eq!(config.max_output_tokens, 2048);
            self.prompts.lock().unwrap().push(prompt.text.clone());
            Ok("an invoice".to_string())
        }
    }

    fn png() -> Vec<u8> {
        let image = GrayImage::from_fn(8, 8, |x, _| if x < 4 { Luma([0]) } else { Luma([255]) });
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn counting() -> Arc<CountingOcr> {
        Arc::new(CountingOcr {
            calls: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_image_is_preprocessed_before_ocr() {
        let ocr = counting();
        let analyzer = DocumentAnalyzer::new(Some(ocr.clone()), None);

        let (text, pages) = analyzer.extract_text(&png(), DocumentKind::Image).await.unwrap();
        assert_eq!(text, "page 1");
        assert_eq!(pages, None);
        assert_eq!(ocr.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_ocr_is_unavailable() {
        let analyzer = DocumentAnalyzer::new(None, None);
        let err = analyzer.extract_text_from_image(&png()).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_rejected() {
        let analyzer = DocumentAnalyzer::new(Some(counting()), None);
        let err = analyzer.extract_text_from_image(b"nope").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pdf_pages_are_separated() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("pdftoppm");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf a > \"$5-1.png\"\nprintf bb > \"$5-2.png\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ocr = counting();
        let analyzer = DocumentAnalyzer::new(Some(ocr.clone()), None)
            .with_rasterizer(PdfRasterizer::new(&script));

        let (text, pages) = analyzer.extract_text(b"%PDF", DocumentKind::Pdf).await.unwrap();
        assert_eq!(pages, Some(2));
        assert_eq!(
            text,
            format!("page 1{0}page 2{0}", OcrConfig::PAGE_BREAK)
        );
        assert_eq!(*ocr.calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_analyze_content_builds_prompt() {
        let generator = Arc::new(RecordingGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let analyzer = DocumentAnalyzer::new(None, Some(generator.clone()));

        let analysis = analyzer.analyze_content("Total due: $40").await.unwrap();
        assert_eq!(analysis, "an invoice");

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("2. Key points and insights"));
        assert!(prompts[0].ends_with("Content:\nTotal due: $40"));
    }

    #[tokio::test]
    async fn test_analyze_without_generator() {
        let analyzer = DocumentAnalyzer::new(None, None);
        let err = analyzer.analyze_content("text").await.unwrap_err();
        assert_eq!(err.status_code(), 503);
    }
}
