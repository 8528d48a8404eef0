//! Bounded analyze, fix, re-verify loop for a single file.

use crate::collab::Analyzer;

/// Ceilings for one run of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_iterations: u32,
    /// Content longer than this many characters is not analyzed at all.
    pub max_chars: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_chars: 50_000,
        }
    }
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First analysis found nothing to fix.
    NoChangeNeeded,
    /// A later analysis accepted the corrected content.
    Verified { iterations: u32 },
    /// Ceiling reached while the analyzer still reported an issue.
    BudgetExhausted { iterations: u32 },
    /// Over the size ceiling; never analyzed.
    Skipped { chars: usize },
    /// The analyzer call itself failed. Corrections accepted so far are kept.
    AnalyzerFailed { iterations: u32, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    pub content: String,
    pub changed: bool,
    pub outcome: Outcome,
    /// Analyzer calls made. Never exceeds `Limits::max_iterations`.
    pub calls: u32,
}

/// Drive the analyzer over `content` until it stops proposing changes or the
/// iteration ceiling is hit. Pure apart from the analyzer calls.
pub fn converge(
    analyzer: &dyn Analyzer,
    path: &str,
    content: &str,
    issue: &str,
    limits: Limits,
) -> Convergence {
    let chars = content.chars().count();
    if chars > limits.max_chars {
        tracing::debug!(file = path, chars, "skipping oversized file");
        return Convergence {
            content: content.to_string(),
            changed: false,
            outcome: Outcome::Skipped { chars },
            calls: 0,
        };
    }

    let mut current = content.to_string();
    let mut accepted = 0;
    let mut calls = 0;

    let outcome = loop {
        if calls >= limits.max_iterations {
            break Outcome::BudgetExhausted {
                iterations: accepted,
            };
        }
        calls += 1;

        let analysis = match analyzer.analyze_file(path, &current, issue) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(file = path, iteration = calls, error = %format!("{e:#}"), "analyzer call failed");
                break Outcome::AnalyzerFailed {
                    iterations: accepted,
                    error: format!("{e:#}"),
                };
            }
        };

        let correction = analysis
            .correction
            .filter(|c| analysis.issue_found && !c.trim().is_empty() && *c != current);
        let Some(correction) = correction else {
            break if accepted == 0 {
                Outcome::NoChangeNeeded
            } else {
                Outcome::Verified {
                    iterations: accepted,
                }
            };
        };

        tracing::info!(file = path, iteration = calls, explanation = %analysis.explanation, "applying correction");
        current = correction;
        accepted += 1;
    };

    Convergence {
        changed: current != content,
        content: current,
        outcome,
        calls,
    }
}
