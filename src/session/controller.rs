//! Resumable scrape session controller.
//!
//! Drives one session: fetch a page, filter and de-duplicate it, hand the
//! survivors to the sink, checkpoint, repeat. Failures are classified and
//! either retried on the backoff ladder or surfaced through [`Interaction`].
//!
//! Cursor invariant: a checkpoint's cursor is the start of the page being
//! processed and `page_ids` lists the items of that page already delivered,
//! so resuming re-fetches the page and skips exactly those.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::SessionEvent;
use super::interaction::{CredentialResponse, Interaction, RecoveryDecision};
use crate::fetchers::{ErrorKind, FetchedBatch, Fetcher};
use crate::models::{NormalizedItem, QueryError, ScrapeQuery, SessionState, SessionStatus};
use crate::policy::{self, Backoff, BreakPolicy, MAX_AUTOMATIC_ATTEMPTS};
use crate::sink::{export_path, Sink};
use crate::store::{SessionStore, StoreError};

pub const DEFAULT_CHECKPOINT_EVERY: u64 = 25;
pub const DEFAULT_MAX_EMPTY_PAGES: u32 = 3;

/// Why a session could not be run to a terminal state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("session {id} targets {found}, not {requested}")]
    IncompatibleResume {
        id: String,
        requested: String,
        found: String,
    },

    #[error("session {0} already finished; retry it to continue in a new session")]
    Terminal(String),

    #[error("failed to checkpoint session: {0}")]
    Store(#[from] StoreError),
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub checkpoint_every: u64,
    /// Consecutive empty pages after which the query counts as exhausted.
    pub max_empty_pages: u32,
    pub breaks: Option<BreakPolicy>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            max_empty_pages: DEFAULT_MAX_EMPTY_PAGES,
            breaks: None,
        }
    }
}

/// Transient state of one failure episode. Never persisted.
#[derive(Debug)]
struct RetryState {
    kind: ErrorKind,
    attempt: u32,
    next_attempt_at: Instant,
}

/// Outcome of a step that may end the session.
enum Step<T> {
    Proceed(T),
    Halt(SessionStatus),
}

/// Runs sessions against one fetcher, sink and store.
///
/// Cheap to clone; clones share collaborators and the cancellation token.
#[derive(Clone)]
pub struct SessionController {
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn Sink>,
    store: Arc<dyn SessionStore>,
    interaction: Arc<dyn Interaction>,
    config: ControllerConfig,
    export_dir: PathBuf,
    events: Option<mpsc::Sender<SessionEvent>>,
    cancel: CancellationToken,
}

impl SessionController {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn Sink>,
        store: Arc<dyn SessionStore>,
        interaction: Arc<dyn Interaction>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            store,
            interaction,
            config: ControllerConfig::default(),
            export_dir: PathBuf::from("exports"),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// A fresh session for `query`, with its export path chosen now.
    pub fn prepare(&self, query: ScrapeQuery) -> SessionState {
        let path = export_path(&self.export_dir, &query, Local::now());
        SessionState::new(query, path)
    }

    /// Run a session to a terminal state.
    ///
    /// With `resume`, the stored session must target the same thing as
    /// `query` and must not be terminal. `Err` means the session could not
    /// be started or a checkpoint could not be written.
    pub async fn run(
        &self,
        query: ScrapeQuery,
        resume: Option<SessionState>,
    ) -> Result<SessionState, SessionError> {
        query.validate()?;
        match resume {
            Some(previous) => {
                if previous.status.is_terminal() {
                    return Err(SessionError::Terminal(previous.id));
                }
                if !previous.query.is_compatible_with(&query) {
                    return Err(SessionError::IncompatibleResume {
                        id: previous.id,
                        requested: query.describe(),
                        found: previous.query.describe(),
                    });
                }
                self.drive(previous, true).await
            }
            None => {
                let state = self.prepare(query);
                self.drive(state, false).await
            }
        }
    }

    /// Resume a stored, non-terminal session.
    pub async fn resume(&self, state: SessionState) -> Result<SessionState, SessionError> {
        self.run(state.query.clone(), Some(state)).await
    }

    /// Continue a terminal session in a new session that supersedes it.
    pub async fn retry(&self, previous: &SessionState) -> Result<SessionState, SessionError> {
        if !previous.status.is_terminal() {
            return self.resume(previous.clone()).await;
        }
        info!(
            "Retrying {} session {} as a new session",
            previous.status, previous.id
        );
        self.run(previous.query.clone(), Some(previous.supersede()))
            .await
    }

    async fn drive(
        &self,
        mut state: SessionState,
        resumed: bool,
    ) -> Result<SessionState, SessionError> {
        if state.output_paths.is_empty() {
            let path = export_path(&self.export_dir, &state.query, Local::now());
            state.output_paths.push(path);
        }
        state.status = SessionStatus::Running;

        let mut seen: HashSet<String> = state.page_ids.iter().cloned().collect();
        let mut since_checkpoint = 0u64;
        let mut empty_pages = 0u32;

        info!(
            "{} session {} for {} via {} ({} already collected)",
            if resumed { "Resuming" } else { "Starting" },
            state.id,
            state.query.describe(),
            self.fetcher.name(),
            state.collected
        );
        self.emit(SessionEvent::Started {
            session_id: state.id.clone(),
            resumed,
            collected: state.collected,
        })
        .await;

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(state, SessionStatus::Stopped).await;
            }

            let FetchedBatch {
                items,
                next_cursor,
                has_more,
            } = match self.fetch_with_recovery(&mut state).await? {
                Step::Proceed(batch) => batch,
                Step::Halt(status) => return self.finish(state, status).await,
            };

            let previous_total = state.collected;
            let fetched = items.len();
            let query = &state.query;
            let survivors: Vec<NormalizedItem> = items
                .into_iter()
                .filter(|item| query.admits(item))
                .filter(|item| seen.insert(item.id.clone()))
                .collect();
            let accepted = survivors.len();

            let mut pending = Vec::new();
            for item in survivors {
                pending.push(item);
                since_checkpoint += 1;
                if since_checkpoint >= self.config.checkpoint_every {
                    if let Step::Halt(status) = self.deliver(&mut state, &mut pending).await? {
                        return self.finish(state, status).await;
                    }
                    self.checkpoint(&mut state).await?;
                    since_checkpoint = 0;
                }
            }
            if let Step::Halt(status) = self.deliver(&mut state, &mut pending).await? {
                return self.finish(state, status).await;
            }

            debug!(
                "Session {}: {} fetched, {} accepted, {} total",
                state.id, fetched, accepted, state.collected
            );
            self.emit(SessionEvent::Batch {
                session_id: state.id.clone(),
                fetched,
                accepted,
                collected: state.collected,
            })
            .await;

            // The page is fully processed; only now may the cursor move.
            match (has_more, next_cursor) {
                (true, Some(next)) => {
                    state.cursor = Some(next);
                    state.page_ids.clear();
                }
                (true, None) => {
                    warn!(
                        "Session {}: backend reported more results without a cursor, treating query as exhausted",
                        state.id
                    );
                    return self.finish(state, SessionStatus::Completed).await;
                }
                (false, _) => return self.finish(state, SessionStatus::Completed).await,
            }

            if fetched == 0 {
                empty_pages += 1;
                if empty_pages >= self.config.max_empty_pages {
                    info!(
                        "Session {}: {} consecutive empty pages, treating query as exhausted",
                        state.id, empty_pages
                    );
                    return self.finish(state, SessionStatus::Completed).await;
                }
            } else {
                empty_pages = 0;
            }

            if let Some(pause) = self
                .config
                .breaks
                .as_ref()
                .and_then(|p| p.pause_due(previous_total, state.collected))
            {
                if let Step::Halt(status) = self.take_break(&mut state, pause).await? {
                    return self.finish(state, status).await;
                }
            }
        }
    }

    /// Fetch the page at the current cursor, recovering from failures.
    async fn fetch_with_recovery(
        &self,
        state: &mut SessionState,
    ) -> Result<Step<FetchedBatch>, SessionError> {
        let mut retry: Option<RetryState> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Step::Halt(SessionStatus::Stopped));
            }

            // Not timed here: fetchers bound each remote request, and a
            // request budget wait can run for minutes.
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Session {}: discarding in-flight fetch", state.id);
                    return Ok(Step::Halt(SessionStatus::Stopped));
                }
                result = self.fetcher.fetch_batch(&state.query, state.cursor.as_deref()) => result,
            };

            let err = match outcome {
                Ok(batch) => {
                    if let Some(episode) = retry.take() {
                        info!(
                            "Session {}: recovered from {} after {} automatic attempt(s)",
                            state.id, episode.kind, episode.attempt
                        );
                    }
                    state.last_error = None;
                    self.transition(state, SessionStatus::Running).await?;
                    return Ok(Step::Proceed(batch));
                }
                Err(e) => e,
            };

            let kind = err.kind();
            let detail = err.to_string();
            state.last_error = Some(detail.clone());
            let attempt = match &retry {
                Some(episode) if matches!(kind, ErrorKind::Network | ErrorKind::RateLimited) => {
                    episode.attempt
                }
                _ => 0,
            };

            match policy::decide(kind, attempt, err.retry_after()) {
                Backoff::Wait(delay) => {
                    warn!(
                        "Session {}: {} (automatic retry {}/{} in {:?})",
                        state.id,
                        detail,
                        attempt + 1,
                        MAX_AUTOMATIC_ATTEMPTS,
                        delay
                    );
                    self.transition(state, SessionStatus::AwaitingNetwork).await?;
                    let episode = RetryState {
                        kind,
                        attempt: attempt + 1,
                        next_attempt_at: Instant::now() + delay,
                    };
                    self.emit(SessionEvent::Retrying {
                        session_id: state.id.clone(),
                        kind,
                        attempt: episode.attempt,
                        delay,
                    })
                    .await;
                    let wake_at = episode.next_attempt_at;
                    retry = Some(episode);
                    if !self.sleep_until(wake_at).await {
                        return Ok(Step::Halt(SessionStatus::Stopped));
                    }
                }
                Backoff::Escalate => {
                    error!(
                        "Session {}: {} automatic retries failed, last error: {}",
                        state.id, MAX_AUTOMATIC_ATTEMPTS, detail
                    );
                    self.transition(state, SessionStatus::AwaitingNetwork).await?;
                    let decision = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(Step::Halt(SessionStatus::Stopped)),
                        decision = self.interaction.on_awaiting_network(state) => decision,
                    };
                    match decision {
                        RecoveryDecision::Retry => retry = None,
                        RecoveryDecision::Stop => return Ok(Step::Halt(SessionStatus::Stopped)),
                    }
                }
                Backoff::Surface if kind == ErrorKind::CredentialExpired => {
                    warn!("Session {}: {}", state.id, detail);
                    retry = None;
                    self.transition(state, SessionStatus::AwaitingCredential)
                        .await?;
                    let response = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(Step::Halt(SessionStatus::Stopped)),
                        response = self.interaction.on_awaiting_credential(state) => response,
                    };
                    match response {
                        CredentialResponse::Provide(credential) => {
                            if let Err(e) = self.fetcher.update_credential(credential).await {
                                warn!("Session {}: new credential not accepted: {}", state.id, e);
                                state.last_error = Some(e.to_string());
                            }
                        }
                        CredentialResponse::Stop => {
                            return Ok(Step::Halt(SessionStatus::Stopped))
                        }
                    }
                }
                Backoff::Surface => {
                    error!("Session {}: {}", state.id, detail);
                    retry = None;
                    match self.ask_unclassified(state, &detail).await {
                        Some(RecoveryDecision::Retry) => {}
                        Some(RecoveryDecision::Stop) => {
                            return Ok(Step::Halt(SessionStatus::Failed))
                        }
                        None => return Ok(Step::Halt(SessionStatus::Stopped)),
                    }
                }
            }
        }
    }

    /// Hand pending items to the sink and count them.
    async fn deliver(
        &self,
        state: &mut SessionState,
        pending: &mut Vec<NormalizedItem>,
    ) -> Result<Step<()>, SessionError> {
        if pending.is_empty() {
            return Ok(Step::Proceed(()));
        }
        let destination = match state.output_path() {
            Some(path) => path.to_path_buf(),
            None => {
                let path = export_path(&self.export_dir, &state.query, Local::now());
                state.output_paths.push(path.clone());
                path
            }
        };

        loop {
            match self.sink.append(pending, &destination).await {
                Ok(outcome) => {
                    if outcome.skipped > 0 {
                        debug!(
                            "Session {}: {} item(s) already present in {}",
                            state.id,
                            outcome.skipped,
                            destination.display()
                        );
                    }
                    state.collected += pending.len() as u64;
                    state.page_ids.extend(pending.drain(..).map(|item| item.id));
                    return Ok(Step::Proceed(()));
                }
                Err(e) => {
                    let detail = format!("export to {} failed: {}", destination.display(), e);
                    error!("Session {}: {}", state.id, detail);
                    state.last_error = Some(detail.clone());
                    match self.ask_unclassified(state, &detail).await {
                        Some(RecoveryDecision::Retry) => continue,
                        Some(RecoveryDecision::Stop) => {
                            return Ok(Step::Halt(SessionStatus::Failed))
                        }
                        None => return Ok(Step::Halt(SessionStatus::Stopped)),
                    }
                }
            }
        }
    }

    /// `None` when cancelled while waiting for the answer.
    async fn ask_unclassified(
        &self,
        state: &SessionState,
        detail: &str,
    ) -> Option<RecoveryDecision> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            decision = self.interaction.on_unclassified_error(state, detail) => Some(decision),
        }
    }

    async fn take_break(
        &self,
        state: &mut SessionState,
        pause: Duration,
    ) -> Result<Step<()>, SessionError> {
        info!(
            "Session {}: scheduled break of {}s after {} items",
            state.id,
            pause.as_secs(),
            state.collected
        );
        self.transition(state, SessionStatus::Paused).await?;
        if !self.sleep_until(Instant::now() + pause).await {
            return Ok(Step::Halt(SessionStatus::Stopped));
        }
        self.transition(state, SessionStatus::Running).await?;
        Ok(Step::Proceed(()))
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn sleep_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    async fn transition(
        &self,
        state: &mut SessionState,
        status: SessionStatus,
    ) -> Result<(), SessionError> {
        if state.status == status {
            return Ok(());
        }
        debug!("Session {}: {} -> {}", state.id, state.status, status);
        state.status = status;
        self.emit(SessionEvent::Status {
            session_id: state.id.clone(),
            status,
        })
        .await;
        self.checkpoint(state).await
    }

    async fn checkpoint(&self, state: &mut SessionState) -> Result<(), SessionError> {
        state.checkpointed_at = Some(Utc::now());
        self.store.save(state).await?;
        self.emit(SessionEvent::Checkpoint {
            session_id: state.id.clone(),
            collected: state.collected,
            cursor: state.cursor.clone(),
        })
        .await;
        Ok(())
    }

    async fn finish(
        &self,
        mut state: SessionState,
        status: SessionStatus,
    ) -> Result<SessionState, SessionError> {
        state.status = status;
        if status == SessionStatus::Completed {
            state.last_error = None;
        }
        self.checkpoint(&mut state).await?;

        match status {
            SessionStatus::Failed => error!(
                "Session {} failed after {} items: {}",
                state.id,
                state.collected,
                state.last_error.as_deref().unwrap_or("unknown error")
            ),
            _ => info!(
                "Session {} {} with {} items",
                state.id, status, state.collected
            ),
        }

        self.emit(SessionEvent::Finished {
            session_id: state.id.clone(),
            status,
            collected: state.collected,
        })
        .await;
        Ok(state)
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}
