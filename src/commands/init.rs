use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use super::project_root;
use crate::config::{self, Config};
use crate::error::ExitError;

const GITIGNORE_ENTRY: &str = ".coding-agent/";

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Model name for the chat completions endpoint
    #[arg(long)]
    pub model: Option<String>,
    /// Seconds between poll scans
    #[arg(long)]
    pub interval: Option<u64>,
    /// Attempts before a task is failed for good
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Non-interactive mode
    #[arg(long)]
    pub no_interactive: bool,
    /// Force overwrite existing config
    #[arg(long)]
    pub force: bool,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl InitArgs {
    pub fn execute(&self) -> Result<()> {
        let project_dir = project_root(self.project_root.as_deref())?;
        let config_path = project_dir.join(config::CONFIG_TOML);
        if config_path.exists() && !self.force {
            return Err(ExitError::Config(format!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            ))
            .into());
        }

        let interactive = !self.no_interactive && std::io::stdin().is_terminal();
        let config = self.build_config(interactive)?;

        fs::write(&config_path, config.to_toml()?)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("Generated {}", config::CONFIG_TOML);

        if ensure_gitignored(&project_dir)? {
            println!("Added {GITIGNORE_ENTRY} to .gitignore");
        }
        Ok(())
    }

    fn build_config(&self, interactive: bool) -> Result<Config> {
        let mut config = Config::default();
        if let Some(model) = &self.model {
            config.llm.model.clone_from(model);
        } else if interactive {
            config.llm.model = prompt_input("Model", &config.llm.model)?;
        }
        if let Some(interval) = self.interval {
            config.worker.interval = interval;
        } else if interactive {
            config.worker.interval = prompt_input("Poll interval (seconds)", &config.worker.interval.to_string())?
                .parse()
                .context("poll interval must be a number")?;
        }
        if let Some(max) = self.max_attempts {
            config.worker.max_attempts = max;
        } else if interactive {
            config.worker.max_attempts = prompt_input("Max attempts per task", &config.worker.max_attempts.to_string())?
                .parse()
                .context("max attempts must be a number")?;
        }
        Ok(config)
    }
}

/// Append the state directory to `.gitignore` unless already listed. Returns true if written.
fn ensure_gitignored(project_dir: &Path) -> Result<bool> {
    let path = project_dir.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    if existing
        .lines()
        .any(|l| l.trim() == GITIGNORE_ENTRY || l.trim() == GITIGNORE_ENTRY.trim_end_matches('/'))
    {
        return Ok(false);
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(GITIGNORE_ENTRY);
    updated.push('\n');
    fs::write(&path, updated).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

// --- Interactive prompts using dialoguer ---

fn prompt_input(prompt: &str, default: &str) -> Result<String> {
    dialoguer::Input::<String>::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .interact_text()
        .context("reading user input")
}
