//! Remote database sources and archive extraction.
//!
//! A [`Fetcher`] streams the zipped database into a writer; the refresh
//! cycle points it at a scratch file and then pulls the single entry out
//! of the archive with [`unzip_single`].

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Overall deadline for one download attempt.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Source of the zipped database file.
pub trait Fetcher: Send + Sync {
    /// Stream the remote file into `dest`, returning the number of bytes
    /// written.
    fn fetch(&self, dest: &mut dyn Write) -> Result<u64>;

    /// Human-readable location, for logs.
    fn location(&self) -> &str;
}

/// Downloads the database over HTTP(S).
pub struct HttpFetcher {
    url: String,
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Create a fetcher with the default 30 minute deadline.
    pub fn new(url: &str) -> Self {
        Self::with_timeout(url, DOWNLOAD_TIMEOUT)
    }

    /// Create a fetcher with a custom overall deadline.
    pub fn with_timeout(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Get the URL being used.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, dest: &mut dyn Write) -> Result<u64> {
        let response = self.agent.get(&self.url).call()?;

        if response.status() != 200 {
            return Err(Error::Remote(format!(
                "download file failed, url: {}, expected status code 200, but got {}",
                self.url,
                response.status()
            )));
        }

        // Upstream reports failures as a JSON document with status 200.
        if is_json_content_type(response.content_type()) {
            let body = response
                .into_string()
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            return Err(Error::RemotePayload {
                url: self.url.clone(),
                body,
            });
        }

        let mut body = response.into_reader();
        io::copy(&mut body, dest).map_err(|e| {
            Error::Remote(format!("failed to read response from {}: {}", self.url, e))
        })
    }

    fn location(&self) -> &str {
        &self.url
    }
}

/// Reads the database from a local file (`file://` URLs).
pub struct FileFetcher {
    path: PathBuf,
    location: String,
}

impl FileFetcher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let location = format!("file://{}", path.display());
        Self { path, location }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, dest: &mut dyn Write) -> Result<u64> {
        let mut file = File::open(&self.path).map_err(|e| {
            Error::Remote(format!("failed to open {}: {}", self.path.display(), e))
        })?;
        Ok(io::copy(&mut file, dest)?)
    }

    fn location(&self) -> &str {
        &self.location
    }
}

/// Pick a fetcher for a configured download URL.
pub fn fetcher_for_url(url: &str) -> Box<dyn Fetcher> {
    match url.strip_prefix("file://") {
        Some(path) => Box::new(FileFetcher::new(path)),
        None => Box::new(HttpFetcher::new(url)),
    }
}

/// Whether a content type names a JSON document.
pub fn is_json_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("application/json")
}

/// Extract the only entry of the zip archive at `src` into `dest`.
///
/// An archive without entries is a format error; extra entries are
/// ignored with a warning.
pub fn unzip_single(src: &Path, dest: &mut dyn Write) -> Result<u64> {
    let mut archive = zip::ZipArchive::new(File::open(src)?)?;

    if archive.len() == 0 {
        return Err(Error::Format("no file in zip".to_string()));
    }
    if archive.len() > 1 {
        log::warn!(
            "zip archive holds {} entries, using the first",
            archive.len()
        );
    }

    let mut entry = archive.by_index(0)?;
    let name = entry.name().to_string();
    io::copy(&mut entry, dest)
        .map_err(|e| Error::Format(format!("failed to extract {}: {}", name, e)))
}
