use std::io::Read;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;

use super::Context;
use crate::error::ExitError;
use crate::intake::{self, IntakeOutcome};

#[derive(Debug, Args)]
pub struct WebhookArgs {
    /// Event name from the X-GitHub-Event header (issues, issue_comment, pull_request)
    #[arg(long)]
    pub event: String,
    /// Payload file, or `-` for stdin
    #[arg(long, default_value = "-")]
    pub payload: String,
    /// X-Hub-Signature-256 header value
    #[arg(long)]
    pub signature: Option<String>,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl WebhookArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = Context::load(self.project_root.as_deref())?;
        let body = self.read_payload()?;

        let secret = ctx.config.github.webhook_secret();
        if !intake::verify_signature(secret.as_deref(), &body, self.signature.as_deref()) {
            tracing::warn!(event = %self.event, "rejected webhook with bad signature");
            return Err(ExitError::BadSignature.into());
        }

        let outcome =
            intake::handle_event(ctx.store.as_ref(), &ctx.config.github.mentions, &self.event, &body)?;
        match &outcome {
            IntakeOutcome::Ignored { reason } => tracing::info!(%reason, "webhook ignored"),
            IntakeOutcome::Queued { task_id, .. }
            | IntakeOutcome::AlreadyQueued { task_id, .. }
            | IntakeOutcome::Requeued { task_id, .. } => {
                tracing::info!(task_id, "webhook accepted");
            }
        }
        println!("{}", serde_json::to_string(&outcome)?);
        Ok(())
    }

    fn read_payload(&self) -> anyhow::Result<Vec<u8>> {
        if self.payload == "-" {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading payload from stdin")?;
            Ok(buf)
        } else {
            std::fs::read(&self.payload).with_context(|| format!("reading {}", self.payload))
        }
    }
}
