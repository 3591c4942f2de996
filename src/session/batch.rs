//! Run one session per identity from a shared template query.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::controller::{SessionController, SessionError};
use crate::models::{ScrapeQuery, SessionState};

/// How one identity of a batch ended.
#[derive(Debug)]
pub enum BatchOutcome {
    Finished {
        identity: String,
        state: SessionState,
    },
    Failed {
        identity: String,
        error: SessionError,
    },
    /// Not started because the batch was cancelled first.
    Skipped { identity: String },
}

impl BatchOutcome {
    pub fn identity(&self) -> &str {
        match self {
            BatchOutcome::Finished { identity, .. }
            | BatchOutcome::Failed { identity, .. }
            | BatchOutcome::Skipped { identity } => identity,
        }
    }

    pub fn state(&self) -> Option<&SessionState> {
        match self {
            BatchOutcome::Finished { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Runs sessions for many identities, at most `concurrency` at a time.
#[derive(Clone)]
pub struct BatchRunner {
    controller: SessionController,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run the template once per identity. Outcomes keep the input order.
    pub async fn run(&self, template: &ScrapeQuery, identities: &[String]) -> Vec<BatchOutcome> {
        info!(
            "Batch of {} identities, {} at a time",
            identities.len(),
            self.concurrency
        );

        stream::iter(identities.iter().cloned())
            .map(|identity| async move {
                if self.controller.cancellation().is_cancelled() {
                    return BatchOutcome::Skipped { identity };
                }
                let query = match template.for_identity(&identity) {
                    Ok(query) => query,
                    Err(e) => {
                        return BatchOutcome::Failed {
                            identity,
                            error: e.into(),
                        }
                    }
                };
                match self.controller.run(query, None).await {
                    Ok(state) => BatchOutcome::Finished { identity, state },
                    Err(error) => {
                        warn!("Session for {} could not run: {}", identity, error);
                        BatchOutcome::Failed { identity, error }
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Identities from a list file: one per line, blank lines and `#` comments
/// ignored, a leading `@` stripped, first occurrence kept.
pub fn parse_identity_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .map(|line| line.trim_start_matches('@'))
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_list() {
        let text = "# accounts to archive\nalice\n\n@bob  # the other one\nALICE\ncarol\n   \n";
        assert_eq!(parse_identity_list(text), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_parse_identity_list_empty() {
        assert!(parse_identity_list("# nothing here\n\n").is_empty());
    }
}
