//! Purpose: Upload finished block artifacts to durable object storage.
//! Exports: `ObjectSink`, `DirectorySink`, `HttpSink`.
//! Role: Last hop of the per-block pipeline before the queue acknowledgement.
//! Invariants: Keys are single path segments; uploads to an existing key overwrite it.
//! Invariants: A key is either fully written or absent (temp file + rename, or one PUT).
//! Invariants: Every failure surfaces as `ErrorKind::Sink`, which workers treat as transient.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::api::queue::ApiResult;
use crate::core::error::{Error, ErrorKind};

pub trait ObjectSink: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> ApiResult<()>;

    fn put_file(&self, key: &str, path: &Path) -> ApiResult<()> {
        let bytes = fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Sink)
                .with_message("failed to read artifact for upload")
                .with_path(path)
                .with_source(err)
        })?;
        self.put(key, &bytes)
    }
}

impl<S: ObjectSink + ?Sized> ObjectSink for Arc<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> ApiResult<()> {
        (**self).put(key, bytes)
    }

    fn put_file(&self, key: &str, path: &Path) -> ApiResult<()> {
        (**self).put_file(key, path)
    }
}

fn check_key(key: &str) -> ApiResult<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("invalid object key {key:?}")));
    }
    Ok(())
}

/// Stores objects as files in one directory.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> ApiResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            Error::new(ErrorKind::Sink)
                .with_message("failed to create sink directory")
                .with_path(&root)
                .with_source(err)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectSink for DirectorySink {
    fn put(&self, key: &str, bytes: &[u8]) -> ApiResult<()> {
        check_key(key)?;
        let target = self.root.join(key);
        let tmp = self.root.join(format!(".{key}.partial"));
        let sink_error = |err: std::io::Error, message: &str, path: &Path| {
            Error::new(ErrorKind::Sink)
                .with_message(message)
                .with_path(path)
                .with_source(err)
        };

        let mut file =
            fs::File::create(&tmp).map_err(|err| sink_error(err, "failed to create object", &tmp))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|err| sink_error(err, "failed to write object", &tmp))?;
        fs::rename(&tmp, &target).map_err(|err| sink_error(err, "failed to publish object", &target))?;
        tracing::debug!(key, bytes = bytes.len(), "object stored");
        Ok(())
    }
}

/// `PUT {base}/{key}` against an S3-style object endpoint.
#[derive(Clone, Debug)]
pub struct HttpSink {
    base_url: Url,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpSink {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let base_url = Url::parse(base_url).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid sink url")
                .with_source(err)
        })?;
        let scheme = base_url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(Error::new(ErrorKind::Usage).with_message("sink url must use http or https scheme"));
        }
        if base_url.cannot_be_a_base() {
            return Err(Error::new(ErrorKind::Usage).with_message("sink url cannot be a base"));
        }
        Ok(Self {
            base_url,
            token: None,
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn object_url(&self, key: &str) -> ApiResult<Url> {
        check_key(key)?;
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::new(ErrorKind::Usage).with_message("sink url cannot be a base"))?;
            path.pop_if_empty();
            path.push(key);
        }
        Ok(url)
    }
}

impl ObjectSink for HttpSink {
    fn put(&self, key: &str, bytes: &[u8]) -> ApiResult<()> {
        let url = self.object_url(key)?;
        let mut request = self
            .agent
            .request("PUT", url.as_str())
            .set("Content-Type", "application/x-ndjson");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        match request.send_bytes(bytes) {
            Ok(_) => {
                tracing::debug!(%url, bytes = bytes.len(), "object uploaded");
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => Err(Error::new(ErrorKind::Sink)
                .with_message(format!("upload of {key} rejected with status {code}"))),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Sink)
                .with_message(format!("upload of {key} failed"))
                .with_source(err)),
        }
    }
}
