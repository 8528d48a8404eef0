//! Template rendering for PR bodies, issue/PR comments, and model prompts.

use std::sync::OnceLock;

use minijinja::{Environment, context};
use serde::Serialize;

use crate::queue::FileReview;

const PR_BODY: &str = include_str!("templates/pr_body.md.jinja");
const FIX_OPENED: &str = include_str!("templates/fix_opened.md.jinja");
const NO_FIXES: &str = include_str!("templates/no_fixes.md.jinja");
const REVIEW_COMMENT: &str = include_str!("templates/review_comment.md.jinja");
const ANALYZE_PROMPT: &str = include_str!("templates/analyze_prompt.jinja");
const REVIEW_PROMPT: &str = include_str!("templates/review_prompt.jinja");

/// Characters of the issue body quoted in the PR description.
const BODY_EXCERPT_CHARS: usize = 500;

fn env() -> anyhow::Result<&'static Environment<'static>> {
    static ENV: OnceLock<Result<Environment<'static>, String>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in [
            ("pr_body", PR_BODY),
            ("fix_opened", FIX_OPENED),
            ("no_fixes", NO_FIXES),
            ("review_comment", REVIEW_COMMENT),
            ("analyze_prompt", ANALYZE_PROMPT),
            ("review_prompt", REVIEW_PROMPT),
        ] {
            env.add_template(name, source).map_err(|e| e.to_string())?;
        }
        Ok(env)
    })
    .as_ref()
    .map_err(|e| anyhow::anyhow!("loading templates: {e}"))
}

fn render(name: &str, ctx: impl Serialize) -> anyhow::Result<String> {
    Ok(env()?.get_template(name)?.render(ctx)?)
}

/// Description of the PR opened for an issue fix.
pub fn render_pr_body(
    issue_number: u64,
    title: &str,
    body: &str,
    files: &[String],
) -> anyhow::Result<String> {
    let excerpt: String = body.trim().chars().take(BODY_EXCERPT_CHARS).collect();
    render(
        "pr_body",
        context! { issue_number, title, excerpt, files },
    )
}

/// Issue comment announcing the fix PR.
pub fn render_fix_opened(pr_number: u64, files: &[String]) -> anyhow::Result<String> {
    render("fix_opened", context! { pr_number, files })
}

/// Issue comment when analysis produced no changes.
pub fn render_no_fixes() -> anyhow::Result<String> {
    render("no_fixes", context! {})
}

/// Summary comment for a PR review. Depends only on its arguments.
pub fn render_review_comment(pr_number: u64, files: &[FileReview]) -> anyhow::Result<String> {
    let all_passed = files.iter().all(|f| f.passed);
    render(
        "review_comment",
        context! { pr_number, files, all_passed },
    )
}

pub fn render_analyze_prompt(
    path: &str,
    language: &str,
    content: &str,
    issue: &str,
) -> anyhow::Result<String> {
    render(
        "analyze_prompt",
        context! { path, language, content, issue },
    )
}

pub fn render_review_prompt(
    path: &str,
    language: &str,
    content: &str,
    issue: &str,
) -> anyhow::Result<String> {
    render(
        "review_prompt",
        context! { path, language, content, issue },
    )
}
