use std::collections::BTreeMap;
use std::fmt;

/// Reviewers whose approval is required for consensus.
pub const MAIN_REVIEWERS: [&str; 3] = ["opus", "codex", "gemini"];
pub const CONSENSUS_THRESHOLD: usize = 3;

/// Latest review per reviewer id.
pub type Reviews = BTreeMap<String, ReviewRecord>;

pub fn is_main_reviewer(reviewer: &str) -> bool {
    MAIN_REVIEWERS.contains(&reviewer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Approved,
    ChangesRequested,
    Commented,
}

impl ReviewStatus {
    /// Unknown values are treated as plain comments.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => ReviewStatus::Approved,
            "CHANGES_REQUESTED" => ReviewStatus::ChangesRequested,
            _ => ReviewStatus::Commented,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Approved => "APPROVED",
            ReviewStatus::ChangesRequested => "CHANGES_REQUESTED",
            ReviewStatus::Commented => "COMMENTED",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRecord {
    pub reviewer: String,
    pub iteration: u32,
    pub status: ReviewStatus,
    pub body: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "P0" => Some(Priority::P0),
            "P1" => Some(Priority::P1),
            "P2" => Some(Priority::P2),
            _ => None,
        }
    }

    pub fn is_blocking(self) -> bool {
        matches!(self, Priority::P0 | Priority::P1)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub priority: Priority,
    pub file: String,
    pub line: Option<u32>,
    /// Full item text as written by the reviewer.
    pub description: String,
    pub problem: String,
    pub solution: String,
    pub reviewer: String,
}

impl Issue {
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.file),
            None => self.file.clone(),
        }
    }
}
