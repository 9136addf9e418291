//! Upload intake: classify incoming files by extension and persist them
//! under the configured upload directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::config::UploadConfig;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Workshop spreadsheet (.xlsx / .xls)
    Workshop,
    /// Interview transcript (.pdf / .json)
    Transcript,
    Unsupported,
}

pub fn classify(file_name: &str) -> FileKind {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("xlsx") | Some("xls") => FileKind::Workshop,
        Some("pdf") | Some("json") => FileKind::Transcript,
        _ => FileKind::Unsupported,
    }
}

/// Strip directory components, fold accents, and replace anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "uploaded_file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FileTypes {
    pub workshop: Vec<String>,
    pub transcript: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RejectedFile {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub uploaded_files: Vec<String>,
    pub file_types: FileTypes,
    pub rejected: Vec<RejectedFile>,
    pub count: usize,
}

/// One file received from the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_file_bytes: usize,
}

impl UploadStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_file_bytes: config.max_file_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one file as `<unix ms>_<sanitized name>` and return its path.
    /// An existing file is never overwritten; a counter is inserted after
    /// the timestamp until the name is free.
    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stamp = chrono::Utc::now().timestamp_millis();
        let name = sanitize_file_name(file_name);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stamped = if attempt == 0 {
                format!("{}_{}", stamp, name)
            } else {
                format!("{}_{}_{}", stamp, attempt, name)
            };
            let path = self.dir.join(stamped);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(bytes).await?;
            file.flush().await?;
            info!("Saved upload {} ({} bytes)", path.display(), bytes.len());
            return Ok(path);
        }
        Err(GatewayError::Io {
            message: format!("no free upload name for '{}'", name),
        })
    }

    pub async fn save_all(&self, files: Vec<IncomingFile>) -> Result<UploadReport> {
        if files.is_empty() {
            return Err(GatewayError::validation("No files provided"));
        }

        let mut report = UploadReport::default();
        for file in files {
            let kind = classify(&file.file_name);
            if kind == FileKind::Unsupported {
                warn!("Rejected upload with unsupported type: {}", file.file_name);
                report.rejected.push(RejectedFile {
                    file_name: file.file_name,
                    reason: "unsupported file type".into(),
                });
                continue;
            }
            if file.bytes.len() > self.max_file_bytes {
                warn!(
                    "Rejected upload {}: {} bytes exceeds limit {}",
                    file.file_name,
                    file.bytes.len(),
                    self.max_file_bytes
                );
                report.rejected.push(RejectedFile {
                    file_name: file.file_name,
                    reason: format!("file exceeds {} bytes", self.max_file_bytes),
                });
                continue;
            }

            let path = self.save(&file.file_name, &file.bytes).await?;
            let path = path.to_string_lossy().into_owned();
            match kind {
                FileKind::Workshop => report.file_types.workshop.push(path.clone()),
                FileKind::Transcript => report.file_types.transcript.push(path.clone()),
                FileKind::Unsupported => {}
            }
            report.uploaded_files.push(path);
        }

        report.count = report.uploaded_files.len();
        report.success = report.count > 0;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(max: usize) -> UploadStore {
        UploadStore::new(&UploadConfig {
            dir: std::env::temp_dir().join(format!("aiko-upload-{}", uuid::Uuid::new_v4())),
            max_file_bytes: max,
        })
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(classify("atelier.XLSX"), FileKind::Workshop);
        assert_eq!(classify("old.xls"), FileKind::Workshop);
        assert_eq!(classify("interview.pdf"), FileKind::Transcript);
        assert_eq!(classify("transcript.json"), FileKind::Transcript);
        assert_eq!(classify("notes.docx"), FileKind::Unsupported);
        assert_eq!(classify("noext"), FileKind::Unsupported);
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\tmp\\Atelier été.xlsx"), "Atelier_ete.xlsx");
        assert_eq!(sanitize_file_name("..."), "uploaded_file");
    }

    #[tokio::test]
    async fn saves_supported_and_rejects_others() {
        let store = temp_store(1024);
        let report = store
            .save_all(vec![
                IncomingFile {
                    file_name: "atelier.xlsx".into(),
                    bytes: b"xl".to_vec(),
                },
                IncomingFile {
                    file_name: "entretien.pdf".into(),
                    bytes: b"%PDF".to_vec(),
                },
                IncomingFile {
                    file_name: "image.png".into(),
                    bytes: vec![0; 4],
                },
                IncomingFile {
                    file_name: "big.pdf".into(),
                    bytes: vec![0; 2048],
                },
            ])
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.count, 2);
        assert_eq!(report.file_types.workshop.len(), 1);
        assert_eq!(report.file_types.transcript.len(), 1);
        assert_eq!(report.rejected.len(), 2);
        assert!(report.file_types.workshop[0].ends_with("_atelier.xlsx"));
        assert!(Path::new(&report.uploaded_files[0]).exists());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let err = temp_store(10).save_all(Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: No files provided");
    }

    #[tokio::test]
    async fn same_name_uploads_do_not_overwrite() {
        let store = temp_store(1024);
        let report = store
            .save_all(vec![
                IncomingFile {
                    file_name: "a/entretien.pdf".into(),
                    bytes: b"FIRST".to_vec(),
                },
                IncomingFile {
                    file_name: "b/entretien.pdf".into(),
                    bytes: b"SECOND".to_vec(),
                },
                IncomingFile {
                    file_name: "été.pdf".into(),
                    bytes: b"accent".to_vec(),
                },
                IncomingFile {
                    file_name: "ete.pdf".into(),
                    bytes: b"plain".to_vec(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(report.count, 4);
        let unique: std::collections::HashSet<_> = report.uploaded_files.iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(std::fs::read(&report.uploaded_files[0]).unwrap(), b"FIRST");
        assert_eq!(std::fs::read(&report.uploaded_files[1]).unwrap(), b"SECOND");
        assert_eq!(std::fs::read(&report.uploaded_files[2]).unwrap(), b"accent");
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
