use std::collections::HashMap;
use std::fmt::Write as _;

use crate::review::model::{
    is_main_reviewer, Issue, Reviews, ReviewStatus, CONSENSUS_THRESHOLD, MAIN_REVIEWERS,
};
use crate::review::parser::ReviewParser;

const DEDUP_PREFIX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consensus {
    pub reached: bool,
    pub approved_count: usize,
    pub total_main_reviewers: usize,
}

/// Optional reviewers never count toward consensus.
pub fn calculate_consensus(reviews: &Reviews) -> Consensus {
    let approved_count = reviews
        .values()
        .filter(|review| is_main_reviewer(&review.reviewer))
        .filter(|review| review.status == ReviewStatus::Approved)
        .count();

    Consensus {
        reached: approved_count >= CONSENSUS_THRESHOLD,
        approved_count,
        total_main_reviewers: MAIN_REVIEWERS.len(),
    }
}

/// P0/P1 issues from every reviewer, deduplicated by location and the
/// start of the description, ordered by priority, file and line.
pub fn extract_blocking_issues(parser: &ReviewParser, reviews: &Reviews) -> Vec<Issue> {
    let mut unique: Vec<Issue> = Vec::new();
    let mut index_by_key: HashMap<(String, Option<u32>, String), usize> = HashMap::new();

    for review in reviews.values() {
        for issue in parser.extract_issues(review) {
            if !issue.priority.is_blocking() {
                continue;
            }
            let key = (
                issue.file.clone(),
                issue.line,
                issue.description.chars().take(DEDUP_PREFIX_CHARS).collect::<String>(),
            );
            match index_by_key.get(&key) {
                Some(&index) => {
                    if issue.priority < unique[index].priority {
                        unique[index] = issue;
                    }
                }
                None => {
                    index_by_key.insert(key, unique.len());
                    unique.push(issue);
                }
            }
        }
    }

    unique.sort_by(|a, b| {
        (a.priority, &a.file, a.line.unwrap_or(0)).cmp(&(b.priority, &b.file, b.line.unwrap_or(0)))
    });
    unique
}

/// Main reviewers that have not posted a review yet, sorted.
pub fn pending_reviewers(reviews: &Reviews) -> Vec<&'static str> {
    let mut pending: Vec<&'static str> = MAIN_REVIEWERS
        .iter()
        .copied()
        .filter(|reviewer| !reviews.contains_key(*reviewer))
        .collect();
    pending.sort_unstable();
    pending
}

pub fn summary_markdown(parser: &ReviewParser, reviews: &Reviews) -> String {
    let consensus = calculate_consensus(reviews);
    let blocking = extract_blocking_issues(parser, reviews);
    let mut out = String::new();

    let _ = writeln!(out, "## Review consensus\n");
    let _ = writeln!(out, "| Reviewer | Iteration | Status |");
    let _ = writeln!(out, "|---|---|---|");
    for reviewer in MAIN_REVIEWERS {
        match reviews.get(reviewer) {
            Some(review) => {
                let _ = writeln!(out, "| {reviewer} | {} | {} |", review.iteration, review.status);
            }
            None => {
                let _ = writeln!(out, "| {reviewer} | - | NOT FOUND |");
            }
        }
    }
    for review in reviews.values().filter(|review| !is_main_reviewer(&review.reviewer)) {
        let _ = writeln!(
            out,
            "| {} (optional) | {} | {} |",
            review.reviewer, review.iteration, review.status
        );
    }

    let _ = writeln!(
        out,
        "\n**Approved:** {}/{}\n",
        consensus.approved_count, consensus.total_main_reviewers
    );
    if consensus.reached {
        let _ = writeln!(out, "**Verdict:** ✅ consensus reached, ready to merge");
    } else {
        let _ = writeln!(out, "**Verdict:** ❌ consensus not reached, fixes required");
    }

    if !blocking.is_empty() {
        let _ = writeln!(out, "\n### Blocking issues ({})\n", blocking.len());
        for issue in &blocking {
            let _ = writeln!(
                out,
                "- **[{}]** `{}` {} ({})",
                issue.priority,
                issue.location(),
                issue.problem,
                issue.reviewer
            );
        }
    }

    let pending = pending_reviewers(reviews);
    if !pending.is_empty() {
        let _ = writeln!(out, "\nWaiting for: {}", pending.join(", "));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{calculate_consensus, extract_blocking_issues, pending_reviewers, summary_markdown};
    use crate::review::model::{Priority, ReviewRecord, ReviewStatus, Reviews};
    use crate::review::parser::ReviewParser;

    fn review(reviewer: &str, status: ReviewStatus, body: &str) -> ReviewRecord {
        ReviewRecord {
            reviewer: reviewer.to_string(),
            iteration: 1,
            status,
            body: body.to_string(),
            timestamp: "2026-03-01T10:00:00Z".to_string(),
        }
    }

    fn reviews(records: Vec<ReviewRecord>) -> Reviews {
        records
            .into_iter()
            .map(|record| (record.reviewer.clone(), record))
            .collect()
    }

    #[test]
    fn unanimous_main_reviewers_reach_consensus_despite_optional_objection() {
        let reviews = reviews(vec![
            review("opus", ReviewStatus::Approved, ""),
            review("codex", ReviewStatus::Approved, ""),
            review("gemini", ReviewStatus::Approved, ""),
            review(
                "copilot",
                ReviewStatus::ChangesRequested,
                "**[P1]** `server/src/net.ts:9` - socket never closed",
            ),
        ]);
        let parser = ReviewParser::new().expect("patterns compile");

        let consensus = calculate_consensus(&reviews);
        assert!(consensus.reached);
        assert_eq!(consensus.approved_count, 3);
        assert_eq!(consensus.total_main_reviewers, 3);

        let blocking = extract_blocking_issues(&parser, &reviews);
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].reviewer, "copilot");
    }

    #[test]
    fn optional_approval_does_not_count() {
        let reviews = reviews(vec![
            review("opus", ReviewStatus::Approved, ""),
            review("codex", ReviewStatus::Approved, ""),
            review("gemini", ReviewStatus::Commented, ""),
            review("copilot", ReviewStatus::Approved, ""),
        ]);

        let consensus = calculate_consensus(&reviews);
        assert!(!consensus.reached);
        assert_eq!(consensus.approved_count, 2);
    }

    #[test]
    fn blocking_issues_are_deduplicated_and_sorted() {
        let reviews = reviews(vec![
            review(
                "opus",
                ReviewStatus::ChangesRequested,
                "**[P1]** `b.ts:20` - leak in handler\n**[P1]** `a.ts` - missing test\n**[P2]** `c.ts:1` - naming",
            ),
            review(
                "codex",
                ReviewStatus::ChangesRequested,
                "**[P0]** `b.ts:20` - leak in handler\n**[P1]** `a.ts:3` - wrong sign",
            ),
        ]);
        let parser = ReviewParser::new().expect("patterns compile");

        let blocking = extract_blocking_issues(&parser, &reviews);
        let summary: Vec<(Priority, String)> = blocking
            .iter()
            .map(|issue| (issue.priority, issue.location()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Priority::P0, "b.ts:20".to_string()),
                (Priority::P1, "a.ts".to_string()),
                (Priority::P1, "a.ts:3".to_string()),
            ]
        );
        assert_eq!(blocking[0].reviewer, "codex");
    }

    #[test]
    fn pending_reviewers_are_sorted() {
        let reviews = reviews(vec![review("gemini", ReviewStatus::Approved, "")]);
        assert_eq!(pending_reviewers(&reviews), vec!["codex", "opus"]);
    }

    #[test]
    fn summary_lists_reviewers_and_verdict() {
        let reviews = reviews(vec![
            review("opus", ReviewStatus::Approved, ""),
            review(
                "copilot",
                ReviewStatus::Commented,
                "**[P0]** `server/src/db.ts:5` - sql injection",
            ),
        ]);
        let parser = ReviewParser::new().expect("patterns compile");

        let summary = summary_markdown(&parser, &reviews);
        assert!(summary.contains("| opus | 1 | APPROVED |"));
        assert!(summary.contains("| codex | - | NOT FOUND |"));
        assert!(summary.contains("| copilot (optional) | 1 | COMMENTED |"));
        assert!(summary.contains("**Approved:** 1/3"));
        assert!(summary.contains("consensus not reached"));
        assert!(summary.contains("- **[P0]** `server/src/db.ts:5` sql injection (copilot)"));
        assert!(summary.contains("Waiting for: codex, gemini"));
    }
}
