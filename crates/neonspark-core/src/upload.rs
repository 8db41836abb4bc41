//! Upload validation: content type, extension allow-list, and size limit.

use crate::config::{parse_extensions, UploadConfig};
use crate::{NeonError, Result};
use std::path::Path;

/// What kind of document an upload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    Pdf,
}

/// Rules applied to every uploaded file.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::new(
            parse_extensions(UploadConfig::DEFAULT_ALLOWED_EXTENSIONS),
            UploadConfig::DEFAULT_MAX_FILE_SIZE,
        )
    }
}

impl UploadPolicy {
    pub fn new(allowed_extensions: Vec<String>, max_file_size: u64) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            max_file_size,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.allowed_extensions.iter().any(|e| *e == extension)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(NeonError::PayloadTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Validate an image upload.
    pub fn validate_image(
        &self,
        filename: Option<&str>,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<()> {
        if !content_type.is_some_and(|ct| ct.starts_with("image/")) {
            return Err(NeonError::validation("file", "File must be an image"));
        }

        let extension = file_extension(filename);
        if !self.is_allowed_extension(&extension) {
            return Err(NeonError::UnsupportedFile {
                extension: display_extension(extension),
            });
        }

        self.check_size(size)
    }

    /// Validate a document upload, which may also be a PDF.
    pub fn validate_document(
        &self,
        filename: Option<&str>,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<DocumentKind> {
        let extension = file_extension(filename);

        let kind = if extension == "pdf" || content_type == Some("application/pdf") {
            DocumentKind::Pdf
        } else if self.is_allowed_extension(&extension) {
            DocumentKind::Image
        } else {
            return Err(NeonError::UnsupportedFile {
                extension: display_extension(extension),
            });
        };

        self.check_size(size)?;
        Ok(kind)
    }
}

/// Lower-cased extension of `filename`, or an empty string.
pub fn file_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn display_extension(extension: String) -> String {
    if extension.is_empty() {
        "(none)".to_string()
    } else {
        extension
    }
}
