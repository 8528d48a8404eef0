use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Config file name constants.
pub const CONFIG_TOML: &str = ".coding-agent.toml";
pub const CONFIG_JSON: &str = ".coding-agent.json";

/// Find the config file in `dir`, preferring .coding-agent.toml over .coding-agent.json.
/// Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let toml_path = dir.join(CONFIG_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = dir.join(CONFIG_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

/// Per-user config file (`~/.config/coding-agent/config.toml` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("coding-agent").join("config.toml"))
}

/// Top-level .coding-agent.toml config. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub fix: FixConfig,
    #[serde(default)]
    pub paths: PathsConfig,

    /// Directory relative `paths` entries resolve against.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GithubConfig {
    #[serde(default = "default_api_url", alias = "apiUrl")]
    pub api_url: String,
    #[serde(default = "default_clone_base", alias = "cloneBase")]
    pub clone_base: String,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env", alias = "tokenEnv")]
    pub token_env: String,
    #[serde(default = "default_webhook_secret_env", alias = "webhookSecretEnv")]
    pub webhook_secret_env: String,
    /// Comment mentions that requeue an issue.
    #[serde(default = "default_mentions")]
    pub mentions: Vec<String>,
    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout_30")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GitConfig {
    #[serde(default = "default_author_name", alias = "authorName")]
    pub author_name: String,
    #[serde(default = "default_author_email", alias = "authorEmail")]
    pub author_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url", alias = "baseUrl")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_120")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerConfig {
    /// Seconds between poll scans.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(default = "default_issue_batch", alias = "issueBatch")]
    pub issue_batch: usize,
    #[serde(default = "default_review_batch", alias = "reviewBatch")]
    pub review_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FixConfig {
    /// Analyze/fix rounds per file.
    #[serde(default = "default_max_iterations", alias = "maxIterations")]
    pub max_iterations: u32,
    /// Files longer than this many characters are skipped.
    #[serde(default = "default_max_file_chars", alias = "maxFileChars")]
    pub max_file_chars: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_excluded_dirs", alias = "excludedDirs")]
    pub excluded_dirs: Vec<String>,
    /// Repo-relative ignore list (glob or `dir/` prefix per line).
    #[serde(default = "default_ignore_file", alias = "ignoreFile")]
    pub ignore_file: String,
    #[serde(default = "default_branch_prefix", alias = "branchPrefix")]
    pub branch_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PathsConfig {
    #[serde(default = "default_store_path")]
    pub store: PathBuf,
    #[serde(default = "default_workspaces_path")]
    pub workspaces: PathBuf,
}

// Default value functions for serde
fn default_api_url() -> String { "https://api.github.com".into() }
fn default_clone_base() -> String { "https://github.com".into() }
fn default_token_env() -> String { "GITHUB_TOKEN".into() }
fn default_webhook_secret_env() -> String { "GITHUB_WEBHOOK_SECRET".into() }
fn default_mentions() -> Vec<String> { vec!["@coding-agent".into(), "@code-agent".into()] }
fn default_timeout_30() -> u64 { 30 }
fn default_timeout_120() -> u64 { 120 }
fn default_author_name() -> String { "coding-agent".into() }
fn default_author_email() -> String { "coding-agent@users.noreply.github.com".into() }
fn default_llm_base_url() -> String { "https://api.openai.com/v1".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".into() }
fn default_temperature() -> f64 { 0.2 }
fn default_interval() -> u64 { 5 }
fn default_max_attempts() -> u32 { 3 }
fn default_issue_batch() -> usize { 1 }
fn default_review_batch() -> usize { 5 }
fn default_max_iterations() -> u32 { 3 }
fn default_max_file_chars() -> usize { 50_000 }
fn default_extensions() -> Vec<String> {
    [".py", ".js", ".ts", ".jsx", ".tsx"].map(String::from).to_vec()
}
fn default_excluded_dirs() -> Vec<String> {
    [".git", "__pycache__", "node_modules", ".venv", "venv", ".tox", "dist", "build"]
        .map(String::from)
        .to_vec()
}
fn default_ignore_file() -> String { ".github/agent_ignore.txt".into() }
fn default_branch_prefix() -> String { "fix/issue-".into() }
fn default_store_path() -> PathBuf { PathBuf::from(".coding-agent/tasks.json") }
fn default_workspaces_path() -> PathBuf { PathBuf::from(".coding-agent/repos") }

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            clone_base: default_clone_base(),
            token_env: default_token_env(),
            webhook_secret_env: default_webhook_secret_env(),
            mentions: default_mentions(),
            timeout: default_timeout_30(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout: default_timeout_120(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_attempts: default_max_attempts(),
            issue_batch: default_issue_batch(),
            review_batch: default_review_batch(),
        }
    }
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_file_chars: default_max_file_chars(),
            extensions: default_extensions(),
            excluded_dirs: default_excluded_dirs(),
            ignore_file: default_ignore_file(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store: default_store_path(),
            workspaces: default_workspaces_path(),
        }
    }
}

impl GithubConfig {
    pub fn token(&self) -> Option<String> {
        non_empty_env(&self.token_env)
    }

    pub fn webhook_secret(&self) -> Option<String> {
        non_empty_env(&self.webhook_secret_env)
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        non_empty_env(&self.api_key_env)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Resolve config for a project directory.
    ///
    /// Looks in `root` first, then the per-user config file, then falls back
    /// to built-in defaults. Environment overrides are applied last.
    pub fn discover(root: &Path) -> anyhow::Result<Self> {
        let found = find_config(root).or_else(|| user_config_path().filter(|p| p.exists()));
        let mut config = match found {
            Some(path) => {
                tracing::debug!(config = %path.display(), "loading config");
                Self::load(&path)?
            }
            None => Self {
                base_dir: root.to_path_buf(),
                ..Self::default()
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load config from a file (TOML or JSON, auto-detected by extension).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config = match ext {
            "json" => Self::parse_json(&contents)?,
            _ => Self::parse_toml(&contents)?,
        };
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).map_err(|e| {
            ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into()
        })
    }

    /// Parse config from a JSON string.
    pub fn parse_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ExitError::Config(format!("invalid {CONFIG_JSON}: {e}")).into()
        })
    }

    /// Apply deployment overrides. `lookup` is normally `std::env::var`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(v) = lookup("WORKER_INTERVAL") {
            self.worker.interval = parse_env("WORKER_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("MAX_ATTEMPTS") {
            self.worker.max_attempts = parse_env("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("MAX_FIX_ITERATIONS") {
            self.fix.max_iterations = parse_env("MAX_FIX_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("OPENAI_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("REPOS_DIR").filter(|v| !v.is_empty()) {
            self.paths.workspaces = PathBuf::from(v);
        }
        if let Some(v) = lookup("CODING_AGENT_STORE").filter(|v| !v.is_empty()) {
            self.paths.store = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.base_dir.join(&self.paths.store)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.base_dir.join(&self.paths.workspaces)
    }

    /// Serialize config to a TOML string with helpful comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# coding-agent configuration\n# Secrets are read from the environment variables named below.\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(tbl) = doc.get_mut(key).and_then(toml_edit::Item::as_table_mut) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        set_table_comment(&mut doc, "github", "# GitHub API and webhook settings\n");
        set_table_comment(&mut doc, "git", "\n# Commit identity for fix branches\n");
        set_table_comment(&mut doc, "llm", "\n# OpenAI-compatible chat completions endpoint\n");
        set_table_comment(&mut doc, "worker", "\n# Poller cadence and retry ceiling\n");
        set_table_comment(&mut doc, "fix", "\n# Issue-fix limits and file selection\n");
        set_table_comment(&mut doc, "paths", "\n# Relative paths resolve against this file's directory\n");

        Ok(doc.to_string())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ExitError::Config(format!("{key} must be a non-negative integer, got {value:?}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.worker.interval, 5);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.worker.issue_batch, 1);
        assert_eq!(config.worker.review_batch, 5);
        assert_eq!(config.fix.max_iterations, 3);
        assert_eq!(config.fix.max_file_chars, 50_000);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.fix.branch_prefix, "fix/issue-");
        assert!(config.fix.extensions.contains(&".tsx".to_string()));
        assert!(config.fix.excluded_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn parse_partial_toml() {
        let config = Config::parse_toml(
            r#"
[worker]
interval = 30

[fix]
extensions = [".rs"]

[llm]
model = "local-model"
base_url = "http://localhost:8080/v1"
"#,
        )
        .unwrap();
        assert_eq!(config.worker.interval, 30);
        assert_eq!(config.worker.max_attempts, 3); // default
        assert_eq!(config.fix.extensions, vec![".rs"]);
        assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
        assert_eq!(config.github.api_url, "https://api.github.com");
    }

    #[test]
    fn parse_json_with_camel_case() {
        let config = Config::parse_json(
            r#"{ "worker": { "maxAttempts": 7, "reviewBatch": 2 }, "fix": { "branchPrefix": "bot/" } }"#,
        )
        .unwrap();
        assert_eq!(config.worker.max_attempts, 7);
        assert_eq!(config.worker.review_batch, 2);
        assert_eq!(config.fix.branch_prefix, "bot/");
    }

    #[test]
    fn parse_malformed_toml() {
        let err = Config::parse_toml("[worker\ninterval = ").unwrap_err();
        assert!(err.to_string().contains("invalid .coding-agent.toml"));
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("WORKER_INTERVAL", "11"),
            ("MAX_ATTEMPTS", "4"),
            ("MAX_FIX_ITERATIONS", "2"),
            ("OPENAI_MODEL", "gpt-test"),
            ("REPOS_DIR", "/tmp/repos"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.worker.interval, 11);
        assert_eq!(config.worker.max_attempts, 4);
        assert_eq!(config.fix.max_iterations, 2);
        assert_eq!(config.llm.model, "gpt-test");
        assert_eq!(config.workspaces_dir(), PathBuf::from("/tmp/repos"));
    }

    #[test]
    fn invalid_env_override_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|k| (k == "MAX_ATTEMPTS").then(|| "three".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_ATTEMPTS"));
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_TOML),
            "[paths]\nstore = \"state/q.json\"\n",
        )
        .unwrap();
        let config = Config::load(&dir.path().join(CONFIG_TOML)).unwrap();
        assert_eq!(config.store_path(), dir.path().join("state/q.json"));
        assert_eq!(
            config.workspaces_dir(),
            dir.path().join(".coding-agent/repos")
        );
    }

    #[test]
    fn find_config_prefers_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_TOML), "").unwrap();
        std::fs::write(dir.path().join(CONFIG_JSON), "{}").unwrap();

        let found = find_config(dir.path()).unwrap();
        assert!(found.to_string_lossy().ends_with(CONFIG_TOML));
    }

    #[test]
    fn find_config_falls_back_to_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_JSON), "{}").unwrap();
        let found = find_config(dir.path()).unwrap();
        assert!(found.to_string_lossy().ends_with(CONFIG_JSON));
    }

    #[test]
    fn find_config_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config(dir.path()).is_none());
    }

    #[test]
    fn roundtrip_toml_with_comments() {
        let mut config = Config::default();
        config.worker.interval = 42;
        let output = config.to_toml().unwrap();
        assert!(output.contains("# coding-agent configuration"));
        assert!(output.contains("# Poller cadence and retry ceiling"));
        let back = Config::parse_toml(&output).unwrap();
        assert_eq!(back.worker.interval, 42);
        assert_eq!(back.llm.model, config.llm.model);
    }
}
