//! OpenAI-compatible chat completions backing the [`Analyzer`] and [`Reviewer`] seams.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::Value;

use super::{Analysis, Analyzer, FileVerdict, Reviewer};
use crate::config::Config;
use crate::template;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    #[serde(default)]
    issue_found: bool,
    #[serde(default)]
    code_correction: Option<String>,
    #[serde(default)]
    explanation: String,
}

pub struct OpenAiClient {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        temperature: f64,
        timeout: Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            temperature,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let api_key = config.llm.api_key();
        if api_key.is_none() {
            tracing::warn!(var = %config.llm.api_key_env, "no model API key set");
        }
        Self::new(
            config.llm.base_url.clone(),
            config.llm.model.clone(),
            api_key,
            config.llm.temperature,
            Duration::from_secs(config.llm.timeout),
        )
    }

    /// Send a single user message and return the reply text.
    pub fn chat(&self, prompt: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let mut req = self
            .agent
            .post(&format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let started = std::time::Instant::now();
        let mut resp = req
            .send(body.to_string())
            .context("calling chat completions")?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .context("reading chat completions response")?;
        tracing::debug!(
            model = %self.model,
            status = status.as_u16(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "chat completion"
        );
        if !status.is_success() {
            bail!(
                "chat completions returned {}: {}",
                status.as_u16(),
                text.trim().chars().take(300).collect::<String>()
            );
        }
        let reply: ChatResponse =
            serde_json::from_str(&text).context("parsing chat completions response")?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("chat completions response had no content")
    }
}

impl Analyzer for OpenAiClient {
    fn analyze_file(&self, path: &str, content: &str, issue: &str) -> anyhow::Result<Analysis> {
        let prompt = template::render_analyze_prompt(path, language_for(path), content, issue)?;
        let reply = self.chat(&prompt)?;
        Ok(parse_analysis(&reply))
    }
}

impl Reviewer for OpenAiClient {
    fn review_file(&self, path: &str, content: &str, issue: &str) -> anyhow::Result<FileVerdict> {
        let prompt = template::render_review_prompt(path, language_for(path), content, issue)?;
        let reply = self.chat(&prompt)?;
        Ok(parse_review(&reply))
    }
}

/// Code fence language for a file path, or "" if unknown.
pub fn language_for(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("py") => "python",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("jsx") => "jsx",
        Some("tsx") => "tsx",
        _ => "",
    }
}

/// Drop a surrounding ``` fence (with optional language tag) from a model reply.
pub fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let Some((_, rest)) = trimmed.split_once('\n') else {
        return trimmed;
    };
    rest.rfind("```").map_or(rest, |end| &rest[..end]).trim()
}

/// Unparseable replies count as "no issue found".
pub fn parse_analysis(reply: &str) -> Analysis {
    match serde_json::from_str::<AnalysisReply>(strip_fences(reply)) {
        Ok(parsed) => Analysis {
            issue_found: parsed.issue_found,
            correction: parsed.code_correction.filter(|c| !c.is_empty()),
            explanation: parsed.explanation,
        },
        Err(e) => {
            tracing::warn!(error = %e, "unparseable analysis reply");
            Analysis::no_issue(format!("Failed to parse AI response: {e}"))
        }
    }
}

/// Unparseable or incomplete replies count as a failed file.
pub fn parse_review(reply: &str) -> FileVerdict {
    let value: Value = match serde_json::from_str(strip_fences(reply)) {
        Ok(v) => v,
        Err(e) => {
            return FileVerdict {
                passed: false,
                notes: format!("Failed to parse AI response: {e}"),
            };
        }
    };
    match (value.get("issue_solved"), value.get("notes")) {
        (Some(solved), Some(notes)) => FileVerdict {
            passed: solved.as_bool().unwrap_or(false),
            notes: notes
                .as_str()
                .map_or_else(|| notes.to_string(), str::to_string),
        },
        _ => FileVerdict {
            passed: false,
            notes: format!("AI response format error. Got: {value}"),
        },
    }
}
