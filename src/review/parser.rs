//! Extraction of review verdicts and issues from pull request comments.
//!
//! Reviewers tag their comment with an HTML comment carrying JSON metadata:
//!
//! ```text
//! <!-- {"type":"review","reviewer":"opus","iteration":1,"status":"APPROVED"} -->
//! ```
//!
//! Issues are markdown items such as
//! ``**[P1]** `server/src/room.ts:42` - missing bounds check. Solution: clamp``.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::review::model::{Issue, Priority, ReviewRecord, ReviewStatus, Reviews};
use crate::review::source::PrComment;

const SOLUTION_MARKERS: [&str; 2] = ["Solution:", "Решение:"];

#[derive(Debug, Deserialize)]
struct ReviewMetadata {
    #[serde(rename = "type")]
    kind: Option<String>,
    reviewer: Option<String>,
    iteration: Option<u32>,
    status: Option<String>,
    timestamp: Option<String>,
}

pub struct ReviewParser {
    metadata: Regex,
    issue_header: Regex,
    item_boundary: Regex,
}

impl ReviewParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            metadata: Regex::new(r"(?s)<!--\s*(\{.*?\})\s*-->")
                .context("invalid metadata pattern")?,
            issue_header: Regex::new(r"\*\*\[(P[012])\]\*\*\s+`([^`]+)`\s+[—–-]\s+")
                .context("invalid issue pattern")?,
            item_boundary: Regex::new(r"\n\s*-|\n\*\*").context("invalid boundary pattern")?,
        })
    }

    /// Returns the review carried by `comment`, if any. Comments without
    /// metadata, with malformed metadata or with a non-review type are skipped.
    pub fn parse_review(&self, comment: &PrComment) -> Option<ReviewRecord> {
        let captures = self.metadata.captures(&comment.body)?;
        let metadata: ReviewMetadata = match serde_json::from_str(&captures[1]) {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("ignoring malformed review metadata: {err}");
                return None;
            }
        };

        if metadata.kind.as_deref() != Some("review") {
            return None;
        }
        let reviewer = metadata.reviewer?.trim().to_ascii_lowercase();
        if reviewer.is_empty() {
            return None;
        }

        Some(ReviewRecord {
            reviewer,
            iteration: metadata.iteration.unwrap_or(0),
            status: metadata
                .status
                .as_deref()
                .map(ReviewStatus::parse)
                .unwrap_or(ReviewStatus::Commented),
            body: comment.body.clone(),
            timestamp: metadata
                .timestamp
                .unwrap_or_else(|| comment.created_at.clone()),
        })
    }

    /// Latest review per reviewer: highest iteration wins, then the later
    /// timestamp, then the later comment.
    pub fn latest_reviews(&self, comments: &[PrComment]) -> Reviews {
        let mut reviews = Reviews::new();
        for review in comments.iter().filter_map(|comment| self.parse_review(comment)) {
            let newer = reviews
                .get(&review.reviewer)
                .map(|current| {
                    (review.iteration, review.timestamp.as_str())
                        >= (current.iteration, current.timestamp.as_str())
                })
                .unwrap_or(true);
            if newer {
                reviews.insert(review.reviewer.clone(), review);
            }
        }
        reviews
    }

    /// All issues in a review body, including non-blocking P2 items.
    pub fn extract_issues(&self, review: &ReviewRecord) -> Vec<Issue> {
        let body = review.body.as_str();
        let mut issues = Vec::new();

        for captures in self.issue_header.captures_iter(body) {
            let Some(priority) = Priority::parse(&captures[1]) else {
                continue;
            };
            let (file, line) = split_location(&captures[2]);

            let Some(header) = captures.get(0) else {
                continue;
            };
            let rest = &body[header.end()..];
            let end = self
                .item_boundary
                .find(rest)
                .map(|boundary| boundary.start())
                .unwrap_or(rest.len());
            let description = rest[..end].trim().to_string();
            let (problem, solution) = split_solution(&description);

            issues.push(Issue {
                priority,
                file,
                line,
                description,
                problem,
                solution,
                reviewer: review.reviewer.clone(),
            });
        }

        issues
    }
}

fn split_location(raw: &str) -> (String, Option<u32>) {
    if let Some((file, line)) = raw.rsplit_once(':') {
        if let Ok(line) = line.trim().parse::<u32>() {
            return (file.trim().to_string(), Some(line));
        }
    }
    (raw.trim().to_string(), None)
}

fn split_solution(description: &str) -> (String, String) {
    let marker = SOLUTION_MARKERS
        .iter()
        .filter_map(|marker| description.find(marker).map(|index| (index, marker.len())))
        .min_by_key(|(index, _)| *index);

    match marker {
        Some((index, len)) => (
            description[..index].trim().to_string(),
            description[index + len..].trim().to_string(),
        ),
        None => (description.to_string(), String::new()),
    }
}
