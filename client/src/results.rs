//! Listing, filtering and printing the analyses of one video.

use std::{collections::HashMap, fmt::Write, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use common::{
    data::{AnalysisResult, AnalysisStatus, Sentiment},
    filter::{filter_results, StatusCounts, StatusFilter},
};
use kdam::term::Colorizer;
use log::{debug, warn};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::api::{cancellable, VideoApi};

pub const LOAD_FAILED: &str = "Failed to load analysis results";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ResultsView {
    api: Arc<dyn VideoApi>,
    video_id: Option<String>,
    stale: bool,
    results: Vec<AnalysisResult>,
    filter: StatusFilter,
    search: String,
    error: Option<String>,
    cancel: CancellationToken,
}

impl ResultsView {
    pub fn new(api: Arc<dyn VideoApi>, cancel: CancellationToken) -> Self {
        Self {
            api,
            video_id: None,
            stale: false,
            results: Vec::new(),
            filter: StatusFilter::All,
            search: String::new(),
            error: None,
            cancel,
        }
    }

    /// Points the view at another video. The listing is only marked stale
    /// when the id actually changes.
    pub fn set_video_id(&mut self, video_id: impl Into<String>) {
        let video_id = video_id.into();
        if self.video_id.as_deref() != Some(video_id.as_str()) {
            self.video_id = Some(video_id);
            self.results.clear();
            self.stale = true;
        }
    }

    pub fn set_filter(&mut self, filter: StatusFilter) {
        self.filter = filter;
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[cfg(test)]
    pub fn results(&self) -> &[AnalysisResult] {
        &self.results
    }

    /// Fetches the listing if the video id changed since the last fetch.
    pub async fn load(&mut self) -> Result<bool> {
        if self.video_id.is_none() {
            return Ok(false);
        }
        if !self.stale {
            return Ok(self.error.is_none());
        }
        self.refresh().await
    }

    /// Fetches the listing unconditionally. Returns whether it succeeded;
    /// on failure the previous listing is kept and [`Self::error`] is set.
    /// `Err` means the fetch was cancelled and nothing changed.
    pub async fn refresh(&mut self) -> Result<bool> {
        let Some(video_id) = self.video_id.clone() else {
            return Ok(false);
        };
        let fetched = cancellable(&self.cancel, self.api.get_analysis_results(&video_id)).await;
        if self.cancel.is_cancelled() {
            return Err(anyhow!("cancelled"));
        }
        self.stale = false;
        match fetched {
            Ok(results) => {
                self.warn_on_regressions(&results);
                debug!("{} analysis records for {video_id}", results.len());
                self.results = results;
                self.error = None;
                Ok(true)
            }
            Err(e) => {
                debug!("loading results for {video_id}: {e:#}");
                self.error = Some(LOAD_FAILED.to_string());
                Ok(false)
            }
        }
    }

    fn warn_on_regressions(&self, fresh: &[AnalysisResult]) {
        let previous: HashMap<&str, AnalysisStatus> =
            self.results.iter().map(|r| (r.id(), r.status())).collect();
        for result in fresh {
            if let Some(&before) = previous.get(result.id()) {
                if !before.can_advance_to(result.status()) {
                    warn!(
                        "analysis {} went from {before} back to {}",
                        result.id(),
                        result.status()
                    );
                }
            }
        }
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_results(&self.results)
    }

    pub fn filtered(&self) -> Vec<&AnalysisResult> {
        filter_results(&self.results, self.filter, &self.search)
    }

    /// Refreshes every `interval` until nothing is pending or processing.
    /// `on_update` runs after each successful fetch, including the first.
    pub async fn watch(&mut self, interval: Duration, mut on_update: impl FnMut(&Self)) -> Result<()> {
        loop {
            if !self.refresh().await? {
                return Err(anyhow!(LOAD_FAILED));
            }
            on_update(self);
            if !self.counts().has_unfinished() {
                return Ok(());
            }
            select! {
                biased;
                _ = self.cancel.cancelled() => return Err(anyhow!("cancelled")),
                _ = sleep(interval) => {}
            }
        }
    }
}

fn status_color(status: AnalysisStatus) -> &'static str {
    match status {
        AnalysisStatus::Pending => "bold yellow",
        AnalysisStatus::Processing => "bold blue",
        AnalysisStatus::Completed => "bold green",
        AnalysisStatus::Error => "bold red",
    }
}

fn sentiment_color(sentiment: Sentiment) -> &'static str {
    match sentiment {
        Sentiment::Positive => "green",
        Sentiment::Neutral => "white",
        Sentiment::Negative => "red",
    }
}

pub fn render_result(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let status = result.status();
    let _ = write!(
        out,
        "{} {}",
        format!("[{status}]").colorize(status_color(status)),
        result.id()
    );
    if status == AnalysisStatus::Processing {
        if let Some(progress) = result.progress() {
            let _ = write!(out, " ({progress:.0}%)");
        }
    }
    let _ = writeln!(out, "  created {}", result.created_at().format("%Y-%m-%d"));

    if let Some(analysis) = result.analysis() {
        let _ = writeln!(out, "  {}", analysis.summary);
        for point in &analysis.key_points {
            let _ = writeln!(out, "    • {point}");
        }
        let sentiment = analysis.sentiment;
        let _ = write!(
            out,
            "  sentiment: {}  duration: {}",
            sentiment.to_string().colorize(sentiment_color(sentiment)),
            analysis.formatted_duration()
        );
        if let Some(language) = &analysis.language {
            let _ = write!(out, "  language: {language}");
        }
        out.push('\n');
    }
    if let Some(error) = result.error() {
        let _ = writeln!(out, "  {}", "Analysis failed".colorize("red"));
        let _ = writeln!(out, "  {error}");
    }
    out
}

/// The counts line followed by every result passing the current filter.
pub fn render_view(view: &ResultsView) -> String {
    let counts = view.counts();
    if counts.total() == 0 {
        return "No analysis results yet\n".to_string();
    }
    let mut out = String::new();
    let _ = write!(out, "{} total", counts.total());
    for status in AnalysisStatus::ALL {
        let _ = write!(out, " • {} {status}", counts.get(status));
    }
    out.push('\n');

    let shown = view.filtered();
    if shown.is_empty() {
        out.push_str("No results match the current filter\n");
    }
    for result in shown {
        out.push('\n');
        out.push_str(&render_result(result));
    }
    out
}
