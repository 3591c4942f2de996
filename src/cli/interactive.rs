//! Terminal prompts for sessions that need a human.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget};
use tokio::sync::Mutex;

use crate::fetchers::{load_cookie_file, Credential};
use crate::models::{short_id, BackendKind, SessionState};
use crate::session::{CredentialResponse, Interaction, RecoveryDecision};

/// Reads one answer line. `None` on EOF.
type ReadLine = Arc<dyn Fn() -> Option<String> + Send + Sync>;

fn read_stdin_line() -> Option<String> {
    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim().to_string()),
    }
}

/// Prompts on stdin while the progress spinner is hidden.
///
/// Sessions running side by side share `prompt`, so only one dialog owns
/// the terminal at a time.
pub struct ConsoleInteraction {
    backend: BackendKind,
    progress: ProgressBar,
    prompt: Arc<Mutex<()>>,
    read_line: ReadLine,
}

impl ConsoleInteraction {
    pub fn new(backend: BackendKind, progress: ProgressBar, prompt: Arc<Mutex<()>>) -> Self {
        Self {
            backend,
            progress,
            prompt,
            read_line: Arc::new(read_stdin_line),
        }
    }

    /// Print `notice`, ask `question` and read one line. `None` on EOF.
    ///
    /// Callers hold the prompt lock for the whole dialog.
    async fn ask(&self, notice: String, question: String) -> Option<String> {
        let progress = self.progress.clone();
        let read_line = self.read_line.clone();
        let answer = tokio::task::spawn_blocking(move || {
            progress.set_draw_target(ProgressDrawTarget::hidden());
            eprintln!("{}", notice);
            eprint!("{}", question);
            let _ = io::stderr().flush();

            let answer = read_line();
            progress.set_draw_target(ProgressDrawTarget::stderr());
            answer
        })
        .await;
        answer.ok().flatten()
    }

    async fn confirm(&self, notice: String, question: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        match self.ask(notice, format!("  {} {} ", question, hint)).await {
            Some(answer) if answer.is_empty() => default,
            Some(answer) => answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"),
            None => false,
        }
    }
}

fn describe_error(session: &SessionState) -> &str {
    session.last_error.as_deref().unwrap_or("no details")
}

#[async_trait]
impl Interaction for ConsoleInteraction {
    async fn on_awaiting_credential(&self, session: &SessionState) -> CredentialResponse {
        let _prompt = self.prompt.lock().await;
        let mut notice = format!(
            "\n{} Session {} needs a new credential: {}",
            style("!").yellow(),
            style(short_id(&session.id)).cyan(),
            describe_error(session)
        );

        loop {
            match self.backend {
                BackendKind::Api => {
                    let key = self
                        .ask(notice, "  New API key (empty to stop): ".to_string())
                        .await;
                    return match key {
                        Some(key) if !key.is_empty() => {
                            CredentialResponse::Provide(Credential::ApiKey(key))
                        }
                        _ => CredentialResponse::Stop,
                    };
                }
                BackendKind::Web => {
                    let path = self
                        .ask(notice, "  Path to a fresh cookie file (empty to stop): ".to_string())
                        .await;
                    let Some(path) = path.filter(|p| !p.is_empty()) else {
                        return CredentialResponse::Stop;
                    };
                    let path = PathBuf::from(shellexpand::tilde(&path).as_ref());
                    match load_cookie_file(&path) {
                        Ok(cookies) => return CredentialResponse::Provide(Credential::Cookies(cookies)),
                        Err(e) => notice = format!("  {} {}", style("✗").red(), e),
                    }
                }
            }
        }
    }

    async fn on_awaiting_network(&self, session: &SessionState) -> RecoveryDecision {
        let _prompt = self.prompt.lock().await;
        let notice = format!(
            "\n{} Session {} could not reach the backend after repeated retries: {}",
            style("!").yellow(),
            style(short_id(&session.id)).cyan(),
            describe_error(session)
        );
        if self.confirm(notice, "Try again?", true).await {
            RecoveryDecision::Retry
        } else {
            RecoveryDecision::Stop
        }
    }

    async fn on_unclassified_error(&self, session: &SessionState, detail: &str) -> RecoveryDecision {
        let _prompt = self.prompt.lock().await;
        let notice = format!(
            "\n{} Session {} hit an unexpected error: {}",
            style("✗").red(),
            style(short_id(&session.id)).cyan(),
            detail
        );
        if self.confirm(notice, "Retry?", false).await {
            RecoveryDecision::Retry
        } else {
            RecoveryDecision::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::models::{QueryMode, ScrapeQuery};

    fn session() -> SessionState {
        let query = ScrapeQuery::new(QueryMode::Identity, ["alice"]).unwrap();
        SessionState::new(query, PathBuf::from("alice.jsonl"))
    }

    #[tokio::test]
    async fn test_concurrent_prompts_take_turns() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let answers = Arc::new(AtomicUsize::new(0));

        let reader = {
            let (active, peak, answers) = (active.clone(), peak.clone(), answers.clone());
            move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                active.fetch_sub(1, Ordering::SeqCst);
                // First answer declines, second accepts.
                let n = answers.fetch_add(1, Ordering::SeqCst);
                Some(if n == 0 { "n" } else { "y" }.to_string())
            }
        };
        let mut console = ConsoleInteraction::new(
            BackendKind::Api,
            ProgressBar::hidden(),
            Arc::new(Mutex::new(())),
        );
        console.read_line = Arc::new(reader);

        let (first, second) = (session(), session());
        let (a, b) = tokio::join!(
            console.on_unclassified_error(&first, "boom"),
            console.on_unclassified_error(&second, "boom")
        );

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!((a, b), (RecoveryDecision::Stop, RecoveryDecision::Retry));
    }

    #[tokio::test]
    async fn test_empty_key_stops() {
        let mut console = ConsoleInteraction::new(
            BackendKind::Api,
            ProgressBar::hidden(),
            Arc::new(Mutex::new(())),
        );
        console.read_line = Arc::new(|| Some(String::new()));
        assert_eq!(
            console.on_awaiting_credential(&session()).await,
            CredentialResponse::Stop
        );
    }
}
