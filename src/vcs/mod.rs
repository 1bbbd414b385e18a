//! Git auto-commit
//!
//! Subscribes to watcher events, accumulates changed paths over a debounce
//! window, and commits the batch. Never commits an empty staging area and
//! never commits while the repository is mid-rebase or mid-merge. Every
//! failure is logged and swallowed; the vault pipeline does not depend on
//! git health.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use git2::{Repository, RepositoryState, Signature};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::GitConfig;
use crate::error::{Result, WeaverError};
use crate::llm::{LlmClient, LlmRequest};
use crate::watcher::WatchEvent;

pub struct GitAutoCommit {
    vault_root: PathBuf,
    config: GitConfig,
    /// Present when commit messages should be LLM-composed
    llm: Option<Arc<LlmClient>>,
}

impl GitAutoCommit {
    pub fn new(vault_root: PathBuf, config: GitConfig, llm: Option<Arc<LlmClient>>) -> Self {
        let llm = if config.llm_messages { llm } else { None };
        Self {
            vault_root,
            config,
            llm,
        }
    }

    /// Run the accumulate-and-flush loop until cancelled. A final flush
    /// happens on the way out.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let window = Duration::from_millis(self.config.debounce_ms);
            let mut pending: HashSet<String> = HashSet::new();
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                let sleep_until = deadline.unwrap_or_else(|| {
                    tokio::time::Instant::now() + Duration::from_secs(3600)
                });
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                        let batch = std::mem::take(&mut pending);
                        deadline = None;
                        self.flush(batch).await;
                    }
                    event = events.recv() => match event {
                        Ok(event) => {
                            pending.insert(event.relative_path);
                            deadline.get_or_insert_with(|| {
                                tokio::time::Instant::now() + window
                            });
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "git watcher lagged; next sync commit catches up");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            if !pending.is_empty() {
                self.flush(pending).await;
            }
        })
    }

    async fn flush(&self, paths: HashSet<String>) {
        if paths.is_empty() {
            return;
        }
        let message = self.compose_message(&paths).await;
        let vault_root = self.vault_root.clone();
        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || {
            commit_paths(&vault_root, &config, &paths, &message)
        })
        .await;

        match result {
            Ok(Ok(Some(oid))) => tracing::info!(commit = %oid, "vault changes committed"),
            Ok(Ok(None)) => tracing::debug!("auto-commit skipped (nothing staged or repo busy)"),
            Ok(Err(e)) => tracing::warn!(error = %e, "auto-commit failed"),
            Err(e) => tracing::warn!(error = %e, "auto-commit task failed"),
        }
    }

    async fn compose_message(&self, paths: &HashSet<String>) -> String {
        let fallback = default_message(paths);
        let Some(llm) = &self.llm else {
            return fallback;
        };

        let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let prompt = format!(
            "Write a one-line git commit message (max 72 chars) summarizing \
             changes to these vault files. Reply with the message only.\n\n{}",
            sorted.join("\n")
        );
        match llm
            .send(LlmRequest::text(prompt).with_label("Commit summary"))
            .await
        {
            Ok(reply) => {
                let line = reply.raw.lines().next().unwrap_or_default().trim().to_string();
                if line.is_empty() {
                    fallback
                } else {
                    format!("{}\n\n{}", line, file_list(paths))
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "commit message LLM call failed, using fallback");
                fallback
            }
        }
    }
}

fn default_message(paths: &HashSet<String>) -> String {
    format!("vault: update {} file(s)\n\n{}", paths.len(), file_list(paths))
}

fn file_list(paths: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stage the given paths and commit. Returns `None` when there is nothing
/// to commit or the repository is in a non-clean state.
pub fn commit_paths(
    vault_root: &Path,
    config: &GitConfig,
    paths: &HashSet<String>,
    message: &str,
) -> Result<Option<git2::Oid>> {
    let repo = Repository::open(vault_root)?;
    if repo.state() != RepositoryState::Clean {
        tracing::debug!(state = ?repo.state(), "repository busy, skipping auto-commit");
        return Ok(None);
    }

    let mut index = repo.index()?;
    for rel in paths {
        let rel_path = Path::new(rel);
        if vault_root.join(rel_path).exists() {
            index.add_path(rel_path)?;
        } else {
            // Deletions stage as removals; a path git never saw is a no-op.
            let _ = index.remove_path(rel_path);
        }
    }
    let tree_id = index.write_tree()?;

    let head_commit = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        // Unborn branch: first commit has no parent.
        Err(_) => None,
    };

    let head_tree_id = head_commit.as_ref().map(|c| c.tree_id());
    if head_tree_id == Some(tree_id) {
        return Ok(None);
    }
    if head_tree_id.is_none() {
        let tree = repo.find_tree(tree_id)?;
        if tree.is_empty() {
            return Ok(None);
        }
    }

    index.write()?;
    let tree = repo.find_tree(tree_id)?;
    let signature = Signature::now(&config.author_name, &config.author_email)
        .map_err(|e| WeaverError::Config {
            reason: format!("git signature: {}", e),
        })?;
    let parents: Vec<&git2::Commit> = head_commit.iter().collect();
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )?;
    Ok(Some(oid))
}
