/// Raw byte sources for parse workers: HTTP, local files or memory
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::error::{LoadError, LoadResult};

/// Fetches the complete contents behind a URL.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> LoadResult<Vec<u8>>;
}

/// HTTP(S) fetcher that also reads local paths and `file://` URLs.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> LoadResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| LoadError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn fetch_http(&self, url: &str) -> LoadResult<Vec<u8>> {
        let transport = |e: reqwest::Error| LoadError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().map_err(transport)?.to_vec())
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url)
        } else {
            read_local(url)
        }
    }
}

fn read_local(url: &str) -> LoadResult<Vec<u8>> {
    let path = url.strip_prefix("file://").unwrap_or(url);
    std::fs::read(Path::new(path)).map_err(|e| LoadError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// In-memory source keyed by URL; unknown URLs answer HTTP 404.
#[derive(Default)]
pub struct MemoryFetcher {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(url.into(), bytes);
        }
    }

    pub fn with_file(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(url, bytes);
        self
    }
}

impl SourceFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
        let files = self.files.read().map_err(|_| LoadError::Transport {
            url: url.to_string(),
            message: "memory source poisoned".into(),
        })?;
        files.get(url).cloned().ok_or_else(|| LoadError::Fetch {
            url: url.to_string(),
            status: 404,
        })
    }
}
