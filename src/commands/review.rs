use anyhow::Result;

use crate::cli::PrArgs;
use crate::config::ReviewConfig;
use crate::review::consensus::{
    calculate_consensus, extract_blocking_issues, pending_reviewers, summary_markdown,
};
use crate::review::cycle::{CycleSettings, ReviewCycle};
use crate::review::developer::BeadsBackend;
use crate::review::model::MAIN_REVIEWERS;
use crate::review::parser::ReviewParser;
use crate::review::source::{CommentSource, GhCommentSource};

const PROBLEM_PREVIEW_CHARS: usize = 60;

fn source_for(args: &PrArgs, config: &ReviewConfig) -> GhCommentSource {
    GhCommentSource::new(args.repo.clone().unwrap_or_else(|| config.repo.clone()))
}

/// Returns the process exit code: 0 with consensus, 1 without.
pub(crate) async fn check(args: PrArgs, config: &ReviewConfig) -> Result<i32> {
    let parser = ReviewParser::new()?;
    let comments = source_for(&args, config).fetch_comments(args.pr).await?;
    let reviews = parser.latest_reviews(&comments);

    if reviews.is_empty() {
        println!("No reviews found on PR #{}.", args.pr);
        return Ok(1);
    }

    println!("Reviews on PR #{}:", args.pr);
    for reviewer in MAIN_REVIEWERS {
        match reviews.get(reviewer) {
            Some(review) => println!(
                "  {reviewer:<8} {} (iteration {})",
                review.status, review.iteration
            ),
            None => println!("  {reviewer:<8} NOT FOUND"),
        }
    }

    let consensus = calculate_consensus(&reviews);
    println!(
        "\nConsensus: {}/{} approved",
        consensus.approved_count, consensus.total_main_reviewers
    );
    if consensus.reached {
        println!("✅ consensus reached, ready to merge");
        return Ok(0);
    }

    let blocking = extract_blocking_issues(&parser, &reviews);
    if !blocking.is_empty() {
        println!("\nBlocking issues ({}):", blocking.len());
        for issue in &blocking {
            let preview: String = issue.problem.chars().take(PROBLEM_PREVIEW_CHARS).collect();
            println!("  [{}] {} {preview}", issue.priority, issue.location());
        }
    }
    println!("❌ consensus not reached, fixes required");

    let pending = pending_reviewers(&reviews);
    if !pending.is_empty() {
        println!("\nWaiting for: {}", pending.join(", "));
    }
    Ok(1)
}

pub(crate) async fn summary(args: PrArgs, config: &ReviewConfig) -> Result<i32> {
    let parser = ReviewParser::new()?;
    let comments = source_for(&args, config).fetch_comments(args.pr).await?;
    let reviews = parser.latest_reviews(&comments);

    print!("{}", summary_markdown(&parser, &reviews));
    Ok(0)
}

pub(crate) async fn cycle(args: PrArgs, config: &ReviewConfig) -> Result<i32> {
    let backend = BeadsBackend::new(config.beads_cwd.clone(), config.repo_path.clone())?;
    let mut cycle = ReviewCycle::new(
        args.pr,
        source_for(&args, config),
        backend,
        CycleSettings::from_config(config),
    )?;

    let outcome = cycle.run().await?;
    println!("Review cycle for PR #{} finished: {outcome}", args.pr);
    Ok(outcome.exit_code())
}
