//! Tesseract OCR driven as a child process.
//!
//! Images are piped through `tesseract stdin stdout -l <lang>`; the engine
//! finds its language models through `TESSDATA_PREFIX`.

use super::OcrEngine;
use crate::config::OcrConfig;
use crate::{NeonError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Tesseract binary plus the settings it is invoked with.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    version: String,
    language: String,
    tessdata_prefix: Option<PathBuf>,
    timeout: Duration,
}

impl TesseractOcr {
    /// Pick the binary: an explicit path, then the usual install locations,
    /// then whatever `tesseract` resolves to on `PATH`.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        OcrConfig::COMMON_TESSERACT_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("tesseract"))
    }

    /// Run the binary once and build an engine if it works.
    pub async fn detect(binary: PathBuf, tessdata_prefix: Option<PathBuf>) -> Result<Self> {
        let version = detect_version(&binary).await?;
        info!("Tesseract found: {} ({})", version, binary.display());

        Ok(Self {
            binary,
            version,
            language: OcrConfig::DEFAULT_LANGUAGE.to_string(),
            tessdata_prefix,
            timeout: OcrConfig::RECOGNIZE_TIMEOUT,
        })
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(prefix) = &self.tessdata_prefix {
            cmd.env("TESSDATA_PREFIX", prefix);
        }

        let mut child = cmd.spawn().map_err(|e| NeonError::OcrUnavailable {
            message: format!("failed to start {}: {}", self.binary.display(), e),
        })?;

        let mut stdin = child.stdin.take().ok_or_else(|| NeonError::Ocr {
            message: "tesseract stdin was not captured".to_string(),
        })?;

        // Tesseract can exit before draining stdin; its stderr then takes
        // precedence over the failed write.
        let run = async move {
            let written = stdin.write_all(image).await;
            drop(stdin);
            let output = child.wait_with_output().await?;
            Ok::<_, std::io::Error>((output, written))
        };

        let (output, written) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| NeonError::Ocr {
                message: format!("tesseract did not finish within {:?}", self.timeout),
            })?
            .map_err(|e| NeonError::Ocr {
                message: format!("tesseract I/O failed: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NeonError::Ocr {
                message: format!("tesseract exited with {}: {}", output.status, stderr.trim()),
            });
        }
        if let Err(e) = written {
            return Err(NeonError::Ocr {
                message: format!("tesseract stopped reading the image: {}", e),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract produced {} characters", text.len());
        Ok(text)
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn image_to_text(&self, image: &[u8]) -> Result<String> {
        self.recognize(image).await
    }
}

/// Run `<binary> --version` and return the first line it prints.
pub async fn detect_version(binary: &Path) -> Result<String> {
    let output = tokio::time::timeout(
        OcrConfig::VERSION_CHECK_TIMEOUT,
        Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| NeonError::OcrUnavailable {
        message: format!("{} --version timed out", binary.display()),
    })?
    .map_err(|e| NeonError::OcrUnavailable {
        message: format!("{} is not runnable: {}", binary.display(), e),
    })?;

    if !output.status.success() {
        return Err(NeonError::OcrUnavailable {
            message: format!("{} --version exited with {}", binary.display(), output.status),
        });
    }

    // Older releases print the banner on stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
        .ok_or_else(|| NeonError::OcrUnavailable {
            message: format!("{} --version printed nothing", binary.display()),
        })
}

/// State of the language-data directory.
#[derive(Debug, Clone, Serialize)]
pub struct TessdataStatus {
    pub path: Option<PathBuf>,
    pub exists: bool,
    pub languages: Vec<String>,
}

/// Inspect `TESSDATA_PREFIX` and list the installed `*.traineddata` models.
pub fn check_tessdata(prefix: Option<&Path>) -> TessdataStatus {
    let Some(path) = prefix else {
        return TessdataStatus {
            path: None,
            exists: false,
            languages: Vec::new(),
        };
    };

    let mut languages: Vec<String> = match std::fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "traineddata"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect(),
        Err(e) => {
            warn!("TESSDATA_PREFIX {} is not readable: {}", path.display(), e);
            Vec::new()
        }
    };
    languages.sort();

    TessdataStatus {
        path: Some(path.to_path_buf()),
        exists: path.is_dir(),
        languages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_locate_prefers_explicit_path() {
        let explicit = PathBuf::from("/opt/custom/tesseract");
        assert_eq!(TesseractOcr::locate(Some(&explicit)), explicit);
    }

    #[test]
    fn test_check_tessdata_lists_languages() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"").unwrap();
        std::fs::write(dir.path().join("deu.traineddata"), b"").unwrap();
        std::fs::write(dir.path().join("README"), b"").unwrap();

        let status = check_tessdata(Some(dir.path()));
        assert!(status.exists);
        assert_eq!(status.languages, vec!["deu", "eng"]);

        let missing = check_tessdata(Some(&dir.path().join("nope")));
        assert!(!missing.exists);
        assert!(missing.languages.is_empty());

        assert!(check_tessdata(None).path.is_none());
    }

    #[tokio::test]
    async fn test_detect_missing_binary() {
        let err = TesseractOcr::detect(PathBuf::from("/nonexistent/tesseract"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[cfg(unix)]
    fn fake_tesseract(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("tesseract");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recognize_pipes_image_and_sets_tessdata() {
        let dir = TempDir::new().unwrap();
        let script = fake_tesseract(
            dir.path(),
            r#"if [ "$1" = "--version" ]; then echo "tesseract 5.3.0"; exit 0; fi
bytes=$(wc -c)
echo "lang=$4 bytes=$bytes prefix=$TESSDATA_PREFIX"
"#,
        );

        let engine = TesseractOcr::detect(script, Some(PathBuf::from("/data/tessdata")))
            .await
            .unwrap()
            .with_language("deu");
        assert_eq!(engine.version(), "tesseract 5.3.0");

        let text = engine.image_to_text(b"12345").await.unwrap();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(text, "lang=deu bytes=5 prefix=/data/tessdata");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recognize_reports_engine_failure() {
        let dir = TempDir::new().unwrap();
        let script = fake_tesseract(
            dir.path(),
            r#"if [ "$1" = "--version" ]; then echo "tesseract 5.3.0"; exit 0; fi
cat > /dev/null
echo "Error in pixReadStream" >&2
exit 1
"#,
        );

        let engine = TesseractOcr::detect(script, None).await.unwrap();
        let err = engine.image_to_text(b"junk").await.unwrap_err();
        assert!(err.to_string().contains("Error in pixReadStream"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_reports_stderr_not_broken_pipe() {
        let dir = TempDir::new().unwrap();
        let script = fake_tesseract(
            dir.path(),
            r#"if [ "$1" = "--version" ]; then echo "tesseract 5.3.0"; exit 0; fi
echo "Failed loading language 'eng'" >&2
exit 1
"#,
        );

        let engine = TesseractOcr::detect(script, None).await.unwrap();
        // Larger than a pipe buffer, so the write fails once the child exits.
        let image = vec![0u8; 4 * 1024 * 1024];
        let err = engine.image_to_text(&image).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Failed loading language 'eng'"), "{}", message);
        assert!(!message.contains("I/O failed"));
    }
}
