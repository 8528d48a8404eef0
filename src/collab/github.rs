//! GitHub REST client and the [`CodeHost`] that pairs it with local checkouts.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{CodeHost, GitWorkspaces, IssueDetails, PullRequestInfo};
use crate::config::Config;
use crate::prioritize::FileFilter;

const JSON_MEDIA: &str = "application/vnd.github+json";
const RAW_MEDIA: &str = "application/vnd.github.raw+json";
const PER_PAGE: usize = 100;
/// GitHub stops listing PR files after 3000.
const MAX_PAGES: usize = 30;

#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    head: HeadRef,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

/// Thin blocking client for the handful of REST endpoints the workers need.
pub struct GitHubClient {
    agent: ureq::Agent,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn get_text(&self, path: &str, query: &[(&str, &str)], accept: &str) -> anyhow::Result<String> {
        let mut req = self
            .agent
            .get(&self.url(path))
            .header("Accept", accept)
            .header("User-Agent", "coding-agent")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        for (key, value) in query {
            req = req.query(*key, *value);
        }
        let mut resp = req.call().with_context(|| format!("GET {path}"))?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .with_context(|| format!("reading response of GET {path}"))?;
        if !status.is_success() {
            bail!("GET {path} returned {}: {}", status.as_u16(), api_message(&text));
        }
        Ok(text)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<T> {
        let text = self.get_text(path, query, JSON_MEDIA)?;
        serde_json::from_str(&text).with_context(|| format!("parsing response of GET {path}"))
    }

    fn post_json<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<T> {
        let mut req = self
            .agent
            .post(&self.url(path))
            .header("Accept", JSON_MEDIA)
            .header("User-Agent", "coding-agent")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("Content-Type", "application/json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let mut resp = req
            .send(body.to_string())
            .with_context(|| format!("POST {path}"))?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .with_context(|| format!("reading response of POST {path}"))?;
        if !status.is_success() {
            bail!("POST {path} returned {}: {}", status.as_u16(), api_message(&text));
        }
        serde_json::from_str(&text).with_context(|| format!("parsing response of POST {path}"))
    }

    pub fn issue(&self, repo: &str, number: u64) -> anyhow::Result<IssueDetails> {
        let issue: IssueResponse = self.get_json(&format!("repos/{repo}/issues/{number}"), &[])?;
        Ok(IssueDetails {
            title: issue.title,
            body: issue.body.unwrap_or_default(),
        })
    }

    pub fn pull_request(&self, repo: &str, number: u64) -> anyhow::Result<PullRequestInfo> {
        let pr: PullResponse = self.get_json(&format!("repos/{repo}/pulls/{number}"), &[])?;
        Ok(PullRequestInfo {
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            head_sha: pr.head.sha,
        })
    }

    pub fn pull_request_files(&self, repo: &str, number: u64) -> anyhow::Result<Vec<String>> {
        let path = format!("repos/{repo}/pulls/{number}/files");
        let per_page = PER_PAGE.to_string();
        let mut files = Vec::new();
        for page in 1..=MAX_PAGES {
            let page_str = page.to_string();
            let batch: Vec<PullFile> =
                self.get_json(&path, &[("per_page", per_page.as_str()), ("page", page_str.as_str())])?;
            let len = batch.len();
            files.extend(batch.into_iter().map(|f| f.filename));
            if len < PER_PAGE {
                break;
            }
        }
        Ok(files)
    }

    /// Raw file content at `revision`.
    pub fn file_at(&self, repo: &str, path: &str, revision: &str) -> anyhow::Result<String> {
        self.get_text(
            &format!("repos/{repo}/contents/{}", path.trim_start_matches('/')),
            &[("ref", revision)],
            RAW_MEDIA,
        )
    }

    pub fn default_branch(&self, repo: &str) -> anyhow::Result<String> {
        let info: RepoResponse = self.get_json(&format!("repos/{repo}"), &[])?;
        Ok(info.default_branch)
    }

    /// Number of the open PR whose head is `branch` in the repo owner's namespace.
    pub fn find_open_pull_request(&self, repo: &str, branch: &str) -> anyhow::Result<Option<u64>> {
        let owner = repo.split('/').next().unwrap_or(repo);
        let head = format!("{owner}:{branch}");
        let open: Vec<PullResponse> = self.get_json(
            &format!("repos/{repo}/pulls"),
            &[("state", "open"), ("head", head.as_str())],
        )?;
        Ok(open.first().map(|pr| pr.number))
    }

    pub fn create_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<u64> {
        let created: PullResponse = self.post_json(
            &format!("repos/{repo}/pulls"),
            &serde_json::json!({ "title": title, "body": body, "head": head, "base": base }),
        )?;
        Ok(created.number)
    }

    /// Issues and PRs share the comments endpoint.
    pub fn create_comment(&self, repo: &str, number: u64, body: &str) -> anyhow::Result<()> {
        let _: serde_json::Value = self.post_json(
            &format!("repos/{repo}/issues/{number}/comments"),
            &serde_json::json!({ "body": body }),
        )?;
        Ok(())
    }
}

/// The `message` field of a GitHub error body, or the raw body.
fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect())
}

/// GitHub for API calls, git for everything on disk.
pub struct GitHubHost {
    api: GitHubClient,
    git: GitWorkspaces,
}

impl GitHubHost {
    pub fn new(api: GitHubClient, git: GitWorkspaces) -> Self {
        Self { api, git }
    }

    pub fn from_config(config: &Config) -> Self {
        let token = config.github.token();
        if token.is_none() {
            tracing::warn!(
                var = %config.github.token_env,
                "no GitHub token set, API calls will be anonymous"
            );
        }
        let api = GitHubClient::new(
            config.github.api_url.clone(),
            token.clone(),
            Duration::from_secs(config.github.timeout),
        );
        let git = GitWorkspaces::new(
            config.github.clone_base.clone(),
            token,
            config.git.author_name.clone(),
            config.git.author_email.clone(),
        );
        Self::new(api, git)
    }
}

impl CodeHost for GitHubHost {
    fn get_issue(&self, repo: &str, number: u64) -> anyhow::Result<IssueDetails> {
        self.api.issue(repo, number)
    }

    fn ensure_workspace(&self, repo: &str, dir: &Path) -> anyhow::Result<()> {
        self.git.ensure(repo, dir)
    }

    fn release_workspace(&self, dir: &Path) -> anyhow::Result<()> {
        self.git.release(dir)
    }

    fn create_branch(&self, dir: &Path, name: &str) -> anyhow::Result<()> {
        self.git.create_branch(dir, name)
    }

    fn list_files(&self, dir: &Path, filter: &FileFilter) -> anyhow::Result<Vec<String>> {
        self.git.list_files(dir, filter)
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    fn write_file(&self, path: &Path, content: &str) -> anyhow::Result<()> {
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))
    }

    fn commit(&self, dir: &Path, message: &str) -> anyhow::Result<String> {
        self.git.commit(dir, message)
    }

    fn push(&self, dir: &Path, branch: &str) -> anyhow::Result<()> {
        self.git.push(dir, branch)
    }

    fn create_or_reuse_pr(
        &self,
        repo: &str,
        branch: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<u64> {
        if let Some(number) = self.api.find_open_pull_request(repo, branch)? {
            tracing::info!(pr = number, branch, "reusing open pull request");
            return Ok(number);
        }
        let base = self.api.default_branch(repo)?;
        let number = self.api.create_pull_request(repo, branch, &base, title, body)?;
        tracing::info!(pr = number, branch, base = %base, "opened pull request");
        Ok(number)
    }

    fn comment_on_issue(&self, repo: &str, number: u64, text: &str) -> anyhow::Result<()> {
        self.api.create_comment(repo, number, text)
    }

    fn comment_on_pr(&self, repo: &str, number: u64, text: &str) -> anyhow::Result<()> {
        self.api.create_comment(repo, number, text)
    }

    fn get_pr_changed_files(&self, repo: &str, number: u64) -> anyhow::Result<Vec<String>> {
        self.api.pull_request_files(repo, number)
    }

    fn get_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<PullRequestInfo> {
        self.api.pull_request(repo, number)
    }

    fn get_file_at_revision(
        &self,
        repo: &str,
        path: &str,
        revision: &str,
    ) -> anyhow::Result<String> {
        self.api.file_at(repo, path, revision)
    }
}
