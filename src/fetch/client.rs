// src/fetch/client.rs

//! HTTP transport for artifact downloads
//!
//! Wraps a blocking reqwest client with retry support. Data is streamed to
//! a temporary file next to the destination and renamed into place once the
//! body has been read completely, so a destination path only ever holds a
//! complete transfer.

use crate::config;
use crate::error::{Error, Result};
use indicatif::ProgressBar;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retrieves one URL into one file
///
/// Implementations must leave `dest` absent unless the whole body was
/// written.
pub trait Transport: Send + Sync {
    fn download(
        &self,
        url: &str,
        dest: &Path,
        insecure: bool,
        progress: Option<&ProgressBar>,
    ) -> Result<u64>;
}

/// Blocking HTTP transport with retry support
pub struct HttpTransport {
    client: Client,
    /// Client that skips TLS verification, used for trusted hosts only
    insecure_client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;
        let insecure_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            insecure_client,
            max_retries: max_retries.max(1),
            retry_delay,
        })
    }

    /// Transport using the process-wide timeout and retry settings
    pub fn from_config() -> Result<Self> {
        let config = config::get_config();
        Self::new(
            config.requests_timeout(),
            config.process.max_tries,
            config.retry_delay(),
        )
    }

    fn client(&self, insecure: bool) -> &Client {
        if insecure { &self.insecure_client } else { &self.client }
    }

    fn attempt(
        &self,
        url: &str,
        dest: &Path,
        insecure: bool,
        progress: Option<&ProgressBar>,
    ) -> std::result::Result<u64, (Error, bool)> {
        let response = self
            .client(insecure)
            .get(url)
            .send()
            .map_err(|e| (Error::DownloadError(format!("Failed to fetch {}: {}", url, e)), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err((
                Error::DownloadError(format!("HTTP {} from {}", status, url)),
                retryable,
            ));
        }

        let expected_len = response.content_length();
        let temp_path = temp_path_for(dest);
        let mut file = File::create(&temp_path).map_err(|e| {
            (
                Error::IoError(format!("Failed to create file {}: {e}", temp_path.display())),
                false,
            )
        })?;

        let artifact = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());

        match copy_artifact(response, &mut file, expected_len, progress, &artifact) {
            Ok(downloaded) => {
                fs::rename(&temp_path, dest).map_err(|e| {
                    (
                        Error::IoError(format!(
                            "Failed to move {} to {}: {e}",
                            temp_path.display(),
                            dest.display()
                        )),
                        false,
                    )
                })?;
                Ok(downloaded)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                // A truncated body is a network problem
                Err((e, true))
            }
        }
    }
}

impl Transport for HttpTransport {
    fn download(
        &self,
        url: &str,
        dest: &Path,
        insecure: bool,
        progress: Option<&ProgressBar>,
    ) -> Result<u64> {
        info!("Downloading {} to {}", url, dest.display());
        if insecure {
            debug!("TLS verification disabled for {}", url);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(url, dest, insecure, progress) {
                Ok(downloaded) => {
                    debug!("Downloaded {} bytes to {}", downloaded, dest.display());
                    return Ok(downloaded);
                }
                Err((e, retryable)) => {
                    if !retryable {
                        return Err(e);
                    }
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to download {} after {attempt} attempts: {e}",
                            url
                        )));
                    }
                    warn!("Download attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(self.retry_delay * attempt);
                }
            }
        }
    }
}

/// Forwards writes to `inner` and advances the artifact's progress bar
struct ProgressWriter<'a, W> {
    inner: W,
    progress: Option<&'a ProgressBar>,
    written: u64,
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if let Some(pb) = self.progress {
            pb.inc(n as u64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy an artifact body into `sink` and return the number of bytes written
///
/// A body shorter than the announced length is an error.
fn copy_artifact<R: Read, W: Write>(
    mut body: R,
    sink: W,
    expected_len: Option<u64>,
    progress: Option<&ProgressBar>,
    artifact: &str,
) -> Result<u64> {
    if let Some(pb) = progress {
        match expected_len {
            Some(len) => pb.set_length(len),
            None => pb.set_message(format!("{} (size unknown)", artifact)),
        }
    }

    let mut writer = ProgressWriter {
        inner: BufWriter::new(sink),
        progress,
        written: 0,
    };
    io::copy(&mut body, &mut writer).map_err(|e| {
        Error::DownloadError(format!(
            "Transfer of {} stopped after {} bytes: {}",
            artifact, writer.written, e
        ))
    })?;
    writer
        .flush()
        .map_err(|e| Error::IoError(format!("Failed to write {}: {}", artifact, e)))?;

    match expected_len {
        Some(len) if writer.written != len => Err(Error::DownloadError(format!(
            "{} is incomplete: received {} of {} bytes",
            artifact, writer.written, len
        ))),
        _ => Ok(writer.written),
    }
}

/// `<dest>.tmp`, kept beside the destination so the final rename stays on
/// one filesystem
pub(crate) fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}
