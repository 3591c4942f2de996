//! Callbacks for situations the controller cannot resolve on its own.

use async_trait::async_trait;

use crate::fetchers::Credential;
use crate::models::SessionState;

/// Answer to a credential prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialResponse {
    Provide(Credential),
    Stop,
}

/// Answer to a recovery prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry,
    Stop,
}

/// The user-facing side of a session.
///
/// Every method may wait indefinitely; the controller races each call
/// against cancellation.
#[async_trait]
pub trait Interaction: Send + Sync {
    /// The backend rejected the credential.
    async fn on_awaiting_credential(&self, session: &SessionState) -> CredentialResponse;

    /// Automatic network retries are exhausted.
    async fn on_awaiting_network(&self, session: &SessionState) -> RecoveryDecision;

    /// The backend or the sink failed in a way that has no automatic recovery.
    async fn on_unclassified_error(&self, session: &SessionState, detail: &str)
        -> RecoveryDecision;
}

/// Non-interactive handler that stops whenever asked.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOnPrompt;

#[async_trait]
impl Interaction for StopOnPrompt {
    async fn on_awaiting_credential(&self, _session: &SessionState) -> CredentialResponse {
        CredentialResponse::Stop
    }

    async fn on_awaiting_network(&self, _session: &SessionState) -> RecoveryDecision {
        RecoveryDecision::Stop
    }

    async fn on_unclassified_error(
        &self,
        _session: &SessionState,
        _detail: &str,
    ) -> RecoveryDecision {
        RecoveryDecision::Stop
    }
}
