// src/fetch/progress.rs

//! Progress display for concurrent downloads

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Create a styled progress bar for one artifact
fn create_progress_bar(name: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(name.to_string());
    pb
}

/// Multi-progress manager for parallel downloads
///
/// Wraps indicatif's `MultiProgress` with one bar per artifact and an
/// aggregate bar counting finished artifacts.
pub struct DownloadProgress {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
}

impl DownloadProgress {
    /// Progress manager that draws nothing
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            overall: None,
        }
    }

    /// Progress manager with an aggregate bar over `artifact_count` downloads
    pub fn with_aggregate(artifact_count: usize) -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(artifact_count as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("Total: [{bar:40.green/dim}] {pos}/{len} artifacts - {msg}")
        {
            overall.set_style(style.progress_chars("=>-"));
        }
        let overall = multi.add(overall);

        Self {
            multi,
            overall: Some(overall),
        }
    }

    /// Create a progress bar for an artifact download
    pub fn add_download(&self, name: &str) -> ProgressBar {
        self.multi.add(create_progress_bar(name))
    }

    /// Mark a download as complete
    pub fn finish_download(&self, pb: &ProgressBar, name: &str) {
        pb.finish_with_message(format!("{} [done]", name));
        if let Some(ref overall) = self.overall {
            overall.inc(1);
        }
    }

    /// Mark a download as failed
    pub fn fail_download(&self, pb: &ProgressBar, name: &str, error: &str) {
        pb.abandon_with_message(format!("{} [FAILED: {}]", name, error));
        if let Some(ref overall) = self.overall {
            overall.inc(1);
        }
    }

    /// Finish all downloads and show a summary
    pub fn finish_all(&self, succeeded: usize, failed: usize) {
        if let Some(ref overall) = self.overall {
            if failed > 0 {
                overall.finish_with_message(format!("{} succeeded, {} failed", succeeded, failed));
            } else {
                overall.finish_with_message(format!("{} artifacts", succeeded));
            }
        }
    }
}
