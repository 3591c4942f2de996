//! Scrape sessions: the controller loop, batches, and the hooks it reports through.

mod batch;
mod controller;
mod events;
mod interaction;

pub use batch::{parse_identity_list, BatchOutcome, BatchRunner};
pub use controller::{
    ControllerConfig, SessionController, SessionError, DEFAULT_CHECKPOINT_EVERY,
    DEFAULT_MAX_EMPTY_PAGES,
};
pub use events::SessionEvent;
pub use interaction::{CredentialResponse, Interaction, RecoveryDecision, StopOnPrompt};
