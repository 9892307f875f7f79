// src/fetch/mod.rs

//! Concurrent, checksum-aware artifact fetching
//!
//! Downloads are scheduled on a bounded rayon pool sized by the configured
//! concurrency limit. A failing artifact does not stop the others; the call
//! fails after every transfer has finished if any of them failed. Each
//! artifact is verified right after its own download and deleted when no
//! expected checksum matches.

mod client;
mod progress;

pub use client::{HttpTransport, Transport};
pub use progress::DownloadProgress;

use crate::config;
use crate::error::{Error, Result};
use crate::hash::{ChecksumInfo, must_match_any_checksum};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// One artifact to retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub url: String,
    pub dest: PathBuf,
    /// Any one matching entry accepts the artifact; empty means unverified
    pub checksums: BTreeSet<ChecksumInfo>,
    /// Skip TLS verification (trusted hosts)
    pub insecure: bool,
}

impl FetchJob {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            checksums: BTreeSet::new(),
            insecure: false,
        }
    }

    pub fn with_checksums(mut self, checksums: BTreeSet<ChecksumInfo>) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    fn display_name(&self) -> String {
        self.dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.url.clone())
    }
}

/// Bounded-concurrency downloader
pub struct ArtifactFetcher {
    transport: Arc<dyn Transport>,
    concurrency_limit: usize,
    show_progress: bool,
}

impl ArtifactFetcher {
    pub fn new(transport: Arc<dyn Transport>, concurrency_limit: usize) -> Self {
        Self {
            transport,
            concurrency_limit: concurrency_limit.max(1),
            show_progress: false,
        }
    }

    /// Fetcher over HTTP using the process-wide configuration
    pub fn from_config() -> Result<Self> {
        let transport = HttpTransport::from_config()?;
        Ok(Self::new(
            Arc::new(transport),
            config::get_config().fetch.concurrency_limit,
        ))
    }

    /// Draw progress bars while downloading
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Download every URL to its destination, without verification
    pub fn fetch_all(&self, downloads: &BTreeMap<String, PathBuf>) -> Result<Vec<PathBuf>> {
        let jobs: Vec<FetchJob> = downloads
            .iter()
            .map(|(url, dest)| FetchJob::new(url.clone(), dest.clone()))
            .collect();
        self.fetch_jobs(&jobs)
    }

    /// Download and verify a batch of artifacts
    ///
    /// Destinations that already exist are not downloaded again (they are
    /// still verified), and a destination listed twice is fetched once and
    /// verified against the union of its checksums.
    /// Returns the destination paths in job order.
    pub fn fetch_jobs(&self, jobs: &[FetchJob]) -> Result<Vec<PathBuf>> {
        let unique = merge_jobs(jobs)?;

        if unique.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Fetching {} artifacts with up to {} concurrent transfers",
            unique.len(),
            self.concurrency_limit
        );

        let progress = if self.show_progress {
            DownloadProgress::with_aggregate(unique.len())
        } else {
            DownloadProgress::hidden()
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency_limit)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create download pool: {e}")))?;

        let results: Vec<Result<PathBuf>> = pool.install(|| {
            unique
                .par_iter()
                .map(|job| self.fetch_one(job, &progress))
                .collect()
        });

        let total = results.len();
        let mut paths = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (job, result) in unique.iter().zip(results) {
            match result {
                Ok(path) => paths.push(path),
                Err(e) => {
                    error!("Failed to fetch {}: {}", job.url, e);
                    failures.push(e);
                }
            }
        }
        progress.finish_all(paths.len(), failures.len());

        if failures.is_empty() {
            return Ok(paths);
        }

        // A verification failure keeps its own identity
        if let Some(pos) = failures
            .iter()
            .position(|e| matches!(e, Error::ChecksumMismatch { .. }))
        {
            return Err(failures.swap_remove(pos));
        }
        if failures.len() == 1 {
            return Err(failures.remove(0));
        }
        Err(Error::FetchError(format!(
            "{} of {} downloads failed",
            failures.len(),
            total
        )))
    }

    fn fetch_one(&self, job: &FetchJob, progress: &DownloadProgress) -> Result<PathBuf> {
        let name = job.display_name();
        let pb = progress.add_download(&name);

        let outcome = self.download_if_missing(job, &pb).and_then(|()| {
            if job.checksums.is_empty() {
                debug!("No checksums to verify for {}", name);
                Ok(())
            } else {
                must_match_any_checksum(&job.dest, &job.checksums)
            }
        });

        match outcome {
            Ok(()) => {
                progress.finish_download(&pb, &name);
                Ok(job.dest.clone())
            }
            Err(e) => {
                progress.fail_download(&pb, &name, &e.to_string());
                Err(e)
            }
        }
    }

    fn download_if_missing(&self, job: &FetchJob, pb: &ProgressBar) -> Result<()> {
        if job.dest.exists() {
            debug!("{} already exists, skipping download", job.dest.display());
            return Ok(());
        }
        self.transport
            .download(&job.url, &job.dest, job.insecure, Some(pb))
            .map(|_| ())
    }
}

/// Collapse jobs sharing a destination into one
///
/// Checksum sets are merged. The same destination requested from two
/// different URLs is an error.
fn merge_jobs(jobs: &[FetchJob]) -> Result<Vec<FetchJob>> {
    let mut merged: Vec<FetchJob> = Vec::new();
    let mut index: HashMap<&Path, usize> = HashMap::new();

    for job in jobs {
        let Some(&pos) = index.get(job.dest.as_path()) else {
            index.insert(job.dest.as_path(), merged.len());
            merged.push(job.clone());
            continue;
        };

        let existing = &mut merged[pos];
        if existing.url != job.url {
            return Err(Error::FetchError(format!(
                "{} is requested from both {} and {}",
                job.dest.display(),
                existing.url,
                job.url
            )));
        }
        debug!("Merging duplicate download of {}", job.display_name());
        existing.checksums.extend(job.checksums.iter().cloned());
        existing.insecure &= job.insecure;
    }

    Ok(merged)
}

/// Destination for an artifact file name inside `dir`
///
/// Names built from untrusted input must not carry path separators.
pub fn dest_in(dir: &Path, filename: &str) -> Result<PathBuf> {
    Ok(dir.join(crate::filesystem::path::sanitize_filename(filename)?))
}


#[cfg(test)]
mod tests {
    use super::testing::FakeTransport;
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};

    fn sha256_set(data: &[u8]) -> BTreeSet<ChecksumInfo> {
        [hash_bytes(HashAlgorithm::Sha256, data)].into_iter().collect()
    }

    #[test]
    fn test_fetch_all_downloads_everything() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::new()
                .serve("https://example.com/a.tar.gz", b"aaa")
                .serve("https://example.com/b.tar.gz", b"bbb"),
        );
        let fetcher = ArtifactFetcher::new(transport.clone(), 2);

        let mut downloads = BTreeMap::new();
        downloads.insert("https://example.com/a.tar.gz".to_string(), temp.path().join("a.tar.gz"));
        downloads.insert("https://example.com/b.tar.gz".to_string(), temp.path().join("sub/b.tar.gz"));

        let paths = fetcher.fetch_all(&downloads).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read(temp.path().join("a.tar.gz")).unwrap(), b"aaa");
        assert_eq!(std::fs::read(temp.path().join("sub/b.tar.gz")).unwrap(), b"bbb");
    }

    #[test]
    fn test_existing_destination_not_downloaded() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("cached.tar.gz");
        std::fs::write(&dest, b"cached").unwrap();

        let transport = Arc::new(FakeTransport::new());
        let fetcher = ArtifactFetcher::new(transport.clone(), 1);
        let job = FetchJob::new("https://example.com/cached.tar.gz", &dest)
            .with_checksums(sha256_set(b"cached"));

        fetcher.fetch_jobs(&[job]).unwrap();
        assert!(transport.requested().is_empty());
    }

    #[test]
    fn test_checksum_mismatch_deletes_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::new()
                .serve("https://example.com/good.whl", b"good")
                .serve("https://example.com/bad.whl", b"tampered"),
        );
        let fetcher = ArtifactFetcher::new(transport, 4);

        let good = FetchJob::new("https://example.com/good.whl", temp.path().join("good.whl"))
            .with_checksums(sha256_set(b"good"));
        let bad = FetchJob::new("https://example.com/bad.whl", temp.path().join("bad.whl"))
            .with_checksums(sha256_set(b"original"));

        let err = fetcher.fetch_jobs(&[good, bad]).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(err.to_string().contains("bad.whl"));
        // The other transfer still completed
        assert!(temp.path().join("good.whl").exists());
        assert!(!temp.path().join("bad.whl").exists());
    }

    #[test]
    fn test_any_matching_checksum_accepts() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new().serve("https://example.com/x.zip", b"x"));
        let fetcher = ArtifactFetcher::new(transport, 1);

        let mut checksums = sha256_set(b"x");
        checksums.insert(ChecksumInfo::new("md5", "00000000000000000000000000000000"));
        let job = FetchJob::new("https://example.com/x.zip", temp.path().join("x.zip"))
            .with_checksums(checksums);

        assert!(fetcher.fetch_jobs(&[job]).is_ok());
    }

    #[test]
    fn test_multiple_failures_summarized() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new().serve("https://example.com/ok", b"ok"));
        let fetcher = ArtifactFetcher::new(transport, 3);

        let jobs = vec![
            FetchJob::new("https://example.com/ok", temp.path().join("ok")),
            FetchJob::new("https://example.com/missing1", temp.path().join("m1")),
            FetchJob::new("https://example.com/missing2", temp.path().join("m2")),
        ];

        let err = fetcher.fetch_jobs(&jobs).unwrap_err();
        assert_eq!(err.to_string(), "Fetch failed: 2 of 3 downloads failed");
        assert!(temp.path().join("ok").exists());
    }

    #[test]
    fn test_duplicate_destination_fetched_once() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new().serve("https://example.com/a", b"a"));
        let fetcher = ArtifactFetcher::new(transport.clone(), 2);
        let dest = temp.path().join("a");

        let jobs = vec![
            FetchJob::new("https://example.com/a", &dest),
            FetchJob::new("https://example.com/a", &dest),
        ];
        assert_eq!(fetcher.fetch_jobs(&jobs).unwrap().len(), 1);
        assert_eq!(transport.requested().len(), 1);
    }

    #[test]
    fn test_duplicate_destination_verified_against_all_checksums() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new().serve("https://example.com/a", b"a"));
        let fetcher = ArtifactFetcher::new(transport.clone(), 2);
        let dest = temp.path().join("a");

        let mut stale = BTreeSet::new();
        stale.insert(ChecksumInfo::new("md5", "00000000000000000000000000000000"));
        let jobs = vec![
            FetchJob::new("https://example.com/a", &dest).with_checksums(stale),
            FetchJob::new("https://example.com/a", &dest).with_checksums(sha256_set(b"a")),
        ];
        assert_eq!(fetcher.fetch_jobs(&jobs).unwrap(), vec![dest.clone()]);
        assert_eq!(transport.requested().len(), 1);

        let merged = merge_jobs(&jobs).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].checksums.len(), 2);
    }

    #[test]
    fn test_duplicate_destination_with_other_url_fails() {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let fetcher = ArtifactFetcher::new(transport.clone(), 2);
        let dest = temp.path().join("a");

        let jobs = vec![
            FetchJob::new("https://example.com/a", &dest),
            FetchJob::new("https://mirror.example.com/a", &dest),
        ];
        let err = fetcher.fetch_jobs(&jobs).unwrap_err();
        assert!(err.to_string().contains("https://mirror.example.com/a"));
        assert!(transport.requested().is_empty());
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let fetcher = ArtifactFetcher::new(Arc::new(FakeTransport::new()), 0);
        assert_eq!(fetcher.concurrency_limit(), 1);
    }
}
