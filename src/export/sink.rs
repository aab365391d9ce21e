use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Result of handing one file to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DownloadOutcome {
    pub ok: bool,
    pub id: Option<String>,
    pub error: Option<String>,
}

impl DownloadOutcome {
    pub fn saved(id: impl Into<String>) -> Self {
        Self {
            ok: true,
            id: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

/// Destination for export files. `filename` is always a sanitized relative path.
pub trait DownloadSink {
    fn download_text_as_file(
        &self,
        text: &str,
        filename: &str,
        mime_type: &str,
        use_data_url: bool,
    ) -> DownloadOutcome;
}

impl<T: DownloadSink + ?Sized> DownloadSink for Box<T> {
    fn download_text_as_file(
        &self,
        text: &str,
        filename: &str,
        mime_type: &str,
        use_data_url: bool,
    ) -> DownloadOutcome {
        (**self).download_text_as_file(text, filename, mime_type, use_data_url)
    }
}

/// Writes files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let relative = Path::new(filename);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || filename.is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl DownloadSink for DirectorySink {
    // Files are written directly; there is no data-URL path on disk.
    fn download_text_as_file(
        &self,
        text: &str,
        filename: &str,
        _mime_type: &str,
        _use_data_url: bool,
    ) -> DownloadOutcome {
        let Some(path) = self.resolve(filename) else {
            return DownloadOutcome::failed(format!("refusing unsafe filename {filename:?}"));
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return DownloadOutcome::failed(format!("{}: {err}", parent.display()));
            }
        }
        match fs::write(&path, text) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = text.len(), "wrote export file");
                DownloadOutcome::saved(path.display().to_string())
            }
            Err(err) => DownloadOutcome::failed(format!("{}: {err}", path.display())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub filename: String,
    pub mime_type: String,
    pub text: String,
}

/// Keeps files in memory. Clones share the same file list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    files: Arc<Mutex<Vec<SavedFile>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<SavedFile> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DownloadSink for MemorySink {
    fn download_text_as_file(
        &self,
        text: &str,
        filename: &str,
        mime_type: &str,
        _use_data_url: bool,
    ) -> DownloadOutcome {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.push(SavedFile {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            text: text.to_string(),
        });
        DownloadOutcome::saved(format!("memory:{}", files.len()))
    }
}
