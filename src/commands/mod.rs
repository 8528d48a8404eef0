pub mod init;
pub mod process;
pub mod queue;
pub mod run;
pub mod schema;
pub mod status;
pub mod webhook;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::collab::{GitHubHost, OpenAiClient};
use crate::config::Config;
use crate::queue::{JsonTaskStore, TaskStore};
use crate::runner::{IssueRunner, IssueSettings, ReviewRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Explicit choice, else pretty on a terminal and text when piped.
    pub fn resolve(explicit: Option<Self>) -> Self {
        explicit.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                Self::Pretty
            } else {
                Self::Text
            }
        })
    }
}

/// Resolved project root: the `--project-root` flag or the current directory.
pub fn project_root(flag: Option<&Path>) -> anyhow::Result<PathBuf> {
    match flag {
        Some(p) => Ok(p.to_path_buf()),
        None => std::env::current_dir().context("resolving current directory"),
    }
}

/// Config plus the task store it points at.
pub struct Context {
    pub config: Config,
    pub store: Arc<JsonTaskStore>,
}

impl Context {
    pub fn load(root: Option<&Path>) -> anyhow::Result<Self> {
        let root = project_root(root)?;
        let config = Config::discover(&root)?;
        let store_path = config.store_path();
        tracing::debug!(store = %store_path.display(), "opening task store");
        let store = Arc::new(JsonTaskStore::open(store_path)?);
        Ok(Self { config, store })
    }

    fn store_handle(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn issue_runner(&self) -> IssueRunner {
        IssueRunner::new(
            self.store_handle(),
            Arc::new(GitHubHost::from_config(&self.config)),
            Arc::new(OpenAiClient::from_config(&self.config)),
            IssueSettings::from_config(&self.config),
        )
    }

    pub fn review_runner(&self) -> ReviewRunner {
        ReviewRunner::new(
            self.store_handle(),
            Arc::new(GitHubHost::from_config(&self.config)),
            Arc::new(OpenAiClient::from_config(&self.config)),
        )
    }
}
