//! Durable upload sinks for finished recordings.
//!
//! A storage target identifier selects the sink:
//! - `dir:<path>` or `file://<path>`: copy into a (typically mounted) directory
//! - `http://` / `https://`: HTTP PUT of the file body (feature `upload-http`)
//!
//! `put_file` returns `Ok` only once the copy is confirmed; the controller deletes
//! the local file only after that.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait UploadSink: Send + Sync {
    /// Target identifier, for logs.
    fn target(&self) -> &str;

    /// Stores `local` under `key` (a `/`-separated relative name).
    fn put_file(&self, local: &Path, key: &str) -> Result<()>;
}

/// Resolves a storage target identifier to a sink.
pub trait UploadConnector: Send + Sync {
    fn connect(&self, target: &str) -> Result<Arc<dyn UploadSink>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum StorageTarget {
    Directory(PathBuf),
    #[cfg_attr(not(feature = "upload-http"), allow(dead_code))]
    Http(String),
}

fn parse_target(target: &str) -> Result<StorageTarget> {
    let target = target.trim();
    let dir = target
        .strip_prefix("dir:")
        .or_else(|| target.strip_prefix("file://"));
    if let Some(path) = dir {
        if path.trim().is_empty() {
            return Err(anyhow!("directory storage target needs a path"));
        }
        return Ok(StorageTarget::Directory(PathBuf::from(path)));
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        return parse_http_target(target);
    }
    Err(anyhow!(
        "unsupported storage target '{}' (expected dir:<path>, file://<path> or http(s)://)",
        target
    ))
}

#[cfg(feature = "upload-http")]
fn parse_http_target(target: &str) -> Result<StorageTarget> {
    let url = url::Url::parse(target).context("parse http storage target")?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("http storage target '{}' has no host", target));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(anyhow!(
            "http storage target '{}' must not carry a query or fragment",
            target
        ));
    }
    Ok(StorageTarget::Http(target.to_string()))
}

#[cfg(not(feature = "upload-http"))]
fn parse_http_target(_target: &str) -> Result<StorageTarget> {
    Err(anyhow!("http storage targets need the upload-http feature"))
}

pub fn validate_storage_target(target: &str) -> Result<()> {
    parse_target(target).map(|_| ())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultUploadConnector;

impl UploadConnector for DefaultUploadConnector {
    fn connect(&self, target: &str) -> Result<Arc<dyn UploadSink>> {
        match parse_target(target)? {
            StorageTarget::Directory(root) => Ok(Arc::new(DirectorySink::new(target, root))),
            #[cfg(feature = "upload-http")]
            StorageTarget::Http(base) => Ok(Arc::new(HttpSink::new(&base))),
            #[cfg(not(feature = "upload-http"))]
            StorageTarget::Http(_) => Err(anyhow!("http storage targets need the upload-http feature")),
        }
    }
}

// ----------------------------------------------------------------------------
// Directory sink
// ----------------------------------------------------------------------------

pub struct DirectorySink {
    target: String,
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(target: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            target: target.to_string(),
            root: root.into(),
        }
    }
}

impl UploadSink for DirectorySink {
    fn target(&self) -> &str {
        &self.target
    }

    fn put_file(&self, local: &Path, key: &str) -> Result<()> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let copied = std::fs::copy(local, &dest)
            .with_context(|| format!("copy {} to {}", local.display(), dest.display()))?;
        let expected = std::fs::metadata(local)?.len();
        let stored = std::fs::metadata(&dest)?.len();
        if copied != expected || stored != expected {
            return Err(anyhow!(
                "copy of {} is incomplete ({} of {} bytes)",
                local.display(),
                stored,
                expected
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// HTTP PUT sink
// ----------------------------------------------------------------------------

#[cfg(feature = "upload-http")]
pub struct HttpSink {
    base_url: String,
}

#[cfg(feature = "upload-http")]
impl HttpSink {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[cfg(feature = "upload-http")]
impl UploadSink for HttpSink {
    fn target(&self) -> &str {
        &self.base_url
    }

    fn put_file(&self, local: &Path, key: &str) -> Result<()> {
        let file = std::fs::File::open(local)
            .with_context(|| format!("open {}", local.display()))?;
        let len = file.metadata()?.len();
        let url = format!("{}/{}", self.base_url, key);
        let response = ureq::put(&url)
            .set("Content-Type", "video/mp4")
            .set("Content-Length", &len.to_string())
            .send(file)
            .map_err(|e| anyhow!("PUT {} failed: {}", url, e))?;
        if !(200..300).contains(&response.status()) {
            return Err(anyhow!("PUT {} returned {}", url, response.status()));
        }
        Ok(())
    }
}
