//! Status counting, filtering and search over a listing of analysis results.

use std::{fmt, str::FromStr};

use crate::data::{AnalysisResult, AnalysisStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Only(AnalysisStatus),
}

impl StatusFilter {
    pub fn matches(self, status: AnalysisStatus) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == status,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Only(status) => write!(f, "{status}"),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::Only)
    }
}

/// Case-insensitive substring match over the summary, the key points
/// (joined by spaces) and the error text. An empty term matches everything.
pub fn matches_search(result: &AnalysisResult, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    let analysis = result.analysis();
    let summary = analysis.map(|a| a.summary.to_lowercase()).unwrap_or_default();
    let key_points = analysis
        .map(|a| a.key_points.join(" ").to_lowercase())
        .unwrap_or_default();
    let error = result.error().map(str::to_lowercase).unwrap_or_default();

    summary.contains(&needle) || key_points.contains(&needle) || error.contains(&needle)
}

/// Results passing both the status filter and the search term, in the order the server sent them.
pub fn filter_results<'a>(
    results: &'a [AnalysisResult],
    filter: StatusFilter,
    term: &str,
) -> Vec<&'a AnalysisResult> {
    results
        .iter()
        .filter(|r| filter.matches(r.status()))
        .filter(|r| matches_search(r, term))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut counts = Self::default();
        for result in results {
            *counts.slot(result.status()) += 1;
        }
        counts
    }

    fn slot(&mut self, status: AnalysisStatus) -> &mut usize {
        match status {
            AnalysisStatus::Pending => &mut self.pending,
            AnalysisStatus::Processing => &mut self.processing,
            AnalysisStatus::Completed => &mut self.completed,
            AnalysisStatus::Error => &mut self.error,
        }
    }

    pub fn get(&self, status: AnalysisStatus) -> usize {
        match status {
            AnalysisStatus::Pending => self.pending,
            AnalysisStatus::Processing => self.processing,
            AnalysisStatus::Completed => self.completed,
            AnalysisStatus::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.error
    }

    /// Whether any record may still change.
    pub fn has_unfinished(&self) -> bool {
        self.pending + self.processing > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Analysis, Sentiment};
    use chrono::{DateTime, Utc};

    fn at() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    fn completed(id: &str, summary: &str, key_points: &[&str]) -> AnalysisResult {
        AnalysisResult::completed(
            id.to_string(),
            "v1".to_string(),
            at(),
            None,
            Analysis {
                summary: summary.to_string(),
                key_points: key_points.iter().map(|s| s.to_string()).collect(),
                sentiment: Sentiment::Neutral,
                duration: 90.0,
                language: None,
            },
        )
    }

    fn sample() -> Vec<AnalysisResult> {
        vec![
            completed("c1", "A cooking show about pasta", &["boil water", "add salt"]),
            AnalysisResult::processing("p1".to_string(), "v1".to_string(), at(), Some(20.0)),
            completed("c2", "Travel vlog in Lisbon", &["Tram 28", "Pastel de nata"]),
            AnalysisResult::failed(
                "e1".to_string(),
                "v1".to_string(),
                at(),
                None,
                "Audio track missing".to_string(),
            ),
            AnalysisResult::processing("p2".to_string(), "v1".to_string(), at(), None),
            completed("c3", "Quarterly earnings call", &["revenue up"]),
        ]
    }

    fn ids(results: Vec<&AnalysisResult>) -> Vec<&str> {
        results.into_iter().map(|r| r.id()).collect()
    }

    #[test]
    fn parses_filters() {
        assert_eq!("all".parse::<StatusFilter>(), Ok(StatusFilter::All));
        assert_eq!(
            "Processing".parse::<StatusFilter>(),
            Ok(StatusFilter::Only(AnalysisStatus::Processing))
        );
        assert!("finished".parse::<StatusFilter>().is_err());
        assert_eq!(StatusFilter::Only(AnalysisStatus::Error).to_string(), "error");
    }

    #[test]
    fn status_filter() {
        let results = sample();
        let processing = filter_results(&results, StatusFilter::Only(AnalysisStatus::Processing), "");
        assert_eq!(ids(processing), ["p1", "p2"]);
        assert_eq!(filter_results(&results, StatusFilter::All, "").len(), 6);
        assert!(filter_results(&results, StatusFilter::Only(AnalysisStatus::Pending), "").is_empty());
    }

    #[test]
    fn search_covers_summary_key_points_and_error() {
        let results = sample();
        assert_eq!(ids(filter_results(&results, StatusFilter::All, "LISBON")), ["c2"]);
        assert_eq!(ids(filter_results(&results, StatusFilter::All, "salt")), ["c1"]);
        assert_eq!(ids(filter_results(&results, StatusFilter::All, "water add")), ["c1"]);
        assert_eq!(ids(filter_results(&results, StatusFilter::All, "audio")), ["e1"]);
        assert_eq!(ids(filter_results(&results, StatusFilter::All, "pa")), ["c1", "c2"]);
    }

    #[test]
    fn unmatched_search_is_empty_for_every_filter() {
        let results = sample();
        let mut filters = vec![StatusFilter::All];
        filters.extend(AnalysisStatus::ALL.map(StatusFilter::Only));
        for filter in filters {
            assert!(filter_results(&results, filter, "zeppelin").is_empty(), "{filter}");
        }
    }

    #[test]
    fn search_and_filter_combine() {
        let results = sample();
        let only_errors = StatusFilter::Only(AnalysisStatus::Error);
        assert!(filter_results(&results, only_errors, "lisbon").is_empty());
        assert_eq!(ids(filter_results(&results, only_errors, "track")), ["e1"]);
    }

    #[test]
    fn counts_sum_to_total() {
        let results = sample();
        let counts = StatusCounts::from_results(&results);
        assert_eq!(counts.completed, 3);
        assert_eq!(counts.processing, 2);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.pending, 0);
        let sum: usize = AnalysisStatus::ALL.iter().map(|s| counts.get(*s)).sum();
        assert_eq!(sum, results.len());
        assert_eq!(counts.total(), results.len());
        assert!(counts.has_unfinished());
        assert_eq!(StatusCounts::from_results(&[]).total(), 0);
    }
}
