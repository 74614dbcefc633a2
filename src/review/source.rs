use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::errors::OpsError;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PrComment {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: String,
}

/// Read-only feed of pull request comments, oldest first.
pub trait CommentSource {
    async fn fetch_comments(&self, pr: u64) -> Result<Vec<PrComment>>;
}

pub struct GhCommentSource {
    repo: String,
}

impl GhCommentSource {
    pub fn new(repo: impl Into<String>) -> Self {
        Self { repo: repo.into() }
    }

    fn endpoint(&self, pr: u64) -> String {
        format!("/repos/{}/issues/{pr}/comments", self.repo)
    }
}

impl CommentSource for GhCommentSource {
    async fn fetch_comments(&self, pr: u64) -> Result<Vec<PrComment>> {
        let endpoint = self.endpoint(pr);
        debug!("fetching comments from {endpoint}");

        let output = Command::new("gh")
            .args(["api", "--paginate", endpoint.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .context("failed to run gh; is the GitHub CLI installed?")?;

        if !output.status.success() {
            return Err(OpsError::CommandFailed {
                program: "gh",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        parse_pages(&output.stdout)
            .with_context(|| format!("unexpected response from gh api {endpoint}"))
    }
}

/// `gh api --paginate` prints one JSON array per page back to back.
pub fn parse_pages(raw: &[u8]) -> Result<Vec<PrComment>> {
    let mut comments = Vec::new();
    for page in serde_json::Deserializer::from_slice(raw).into_iter::<Vec<PrComment>>() {
        comments.extend(page?);
    }
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::{parse_pages, GhCommentSource};

    #[test]
    fn paginated_output_is_concatenated() {
        let raw = br#"[{"body":"a","created_at":"2026-01-01T00:00:00Z","id":1}]
[{"body":"b","created_at":"2026-01-02T00:00:00Z"},{"body":"c","created_at":"2026-01-03T00:00:00Z"}]"#;

        let comments = parse_pages(raw).expect("valid pages");
        let bodies: Vec<&str> = comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_output_means_no_comments() {
        assert!(parse_pages(b"").expect("empty is fine").is_empty());
        assert!(parse_pages(b"[]").expect("empty page").is_empty());
    }

    #[test]
    fn garbage_output_is_an_error() {
        assert!(parse_pages(b"<html>rate limited</html>").is_err());
    }

    #[test]
    fn endpoint_targets_issue_comments() {
        let source = GhCommentSource::new("komleff/slime-arena");
        assert_eq!(source.endpoint(110), "/repos/komleff/slime-arena/issues/110/comments");
    }
}
