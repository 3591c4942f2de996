//! Shared helper functions for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::interactive::ConsoleInteraction;
use crate::analytics::ScrapeAnalytics;
use crate::config::Settings;
use crate::fetchers::{build_fetcher, estimate_cost, format_cost};
use crate::models::{short_id, BackendKind, ScrapeQuery, SessionState, SessionStatus};
use crate::rate_limiter::RateLimiter;
use crate::session::{Interaction, SessionController, SessionEvent, StopOnPrompt};
use crate::sink::sink_for;
use crate::store::{FileSessionStore, SessionStore};

/// Everything the session commands share for one invocation.
pub struct Runtime {
    pub settings: Settings,
    pub store: Arc<dyn SessionStore>,
    pub rate_limiter: RateLimiter,
    pub cancel: CancellationToken,
    pub progress: ProgressBar,
    prompt: Arc<Mutex<()>>,
    events: mpsc::Sender<SessionEvent>,
    reporter: JoinHandle<()>,
}

impl Runtime {
    /// Create directories, open the store and start the progress reporter.
    pub fn start(settings: &Settings) -> anyhow::Result<Self> {
        settings.ensure_directories()?;
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&settings.sessions_dir)?);

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        progress.enable_steady_tick(Duration::from_millis(100));

        let (events, rx) = mpsc::channel(256);
        let reporter = tokio::spawn(report_events(rx, progress.clone()));

        Ok(Self {
            settings: settings.clone(),
            store,
            rate_limiter: RateLimiter::with_config(settings.rate_limit_config()),
            cancel: shutdown_token(),
            progress,
            prompt: Arc::new(Mutex::new(())),
            events,
            reporter,
        })
    }

    /// Controller for `query`'s backend and export format.
    pub fn controller(
        &self,
        query: &ScrapeQuery,
        no_prompt: bool,
    ) -> anyhow::Result<SessionController> {
        let fetcher = build_fetcher(query.backend, &self.settings, self.rate_limiter.clone())?;
        let interaction: Arc<dyn Interaction> = if no_prompt {
            Arc::new(StopOnPrompt)
        } else {
            Arc::new(ConsoleInteraction::new(
                query.backend,
                self.progress.clone(),
                self.prompt.clone(),
            ))
        };

        Ok(SessionController::new(
            fetcher,
            sink_for(query.format),
            self.store.clone(),
            interaction,
        )
        .with_config(self.settings.controller_config())
        .with_export_dir(&self.settings.exports_dir)
        .with_events(self.events.clone())
        .with_cancellation(self.cancel.clone()))
    }

    /// Stop reporting, clear the spinner and log what the budget saw.
    pub async fn finish(self) {
        self.reporter.abort();
        self.progress.finish_and_clear();
        for (backend, stats) in self.rate_limiter.stats().await {
            info!(
                "Request budget for {}: {} requests, {} rate limited, delay {:?}{}",
                backend,
                stats.total_requests,
                stats.rate_limit_hits,
                stats.current_delay,
                if stats.in_backoff { " (backing off)" } else { "" }
            );
        }
    }
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Stopping, the current position will be saved",
                style("!").yellow()
            );
            cancel.cancel();
        }
    });
    token
}

async fn report_events(mut rx: mpsc::Receiver<SessionEvent>, progress: ProgressBar) {
    while let Some(event) = rx.recv().await {
        let id = short_id(event.session_id()).to_string();
        match event {
            SessionEvent::Started {
                resumed, collected, ..
            } => {
                let verb = if resumed { "Resuming" } else { "Starting" };
                progress.set_message(format!("[{}] {} ({} collected)", id, verb, collected));
            }
            SessionEvent::Batch {
                fetched,
                accepted,
                collected,
                ..
            } => {
                progress.set_message(format!(
                    "[{}] {} collected (last page: {}/{} kept)",
                    id, collected, accepted, fetched
                ));
            }
            SessionEvent::Status { status, .. } => match status {
                SessionStatus::Paused => {
                    progress.set_message(format!("[{}] Taking a scheduled break", id))
                }
                SessionStatus::AwaitingNetwork => {
                    progress.set_message(format!("[{}] Waiting for the network", id))
                }
                SessionStatus::AwaitingCredential => {
                    progress.set_message(format!("[{}] Waiting for a new credential", id))
                }
                _ => {}
            },
            SessionEvent::Retrying {
                kind,
                attempt,
                delay,
                ..
            } => {
                progress.println(format!(
                    "  {} [{}] {} error, retry {} in {}s",
                    style("!").yellow(),
                    id,
                    kind,
                    attempt,
                    delay.as_secs()
                ));
            }
            SessionEvent::Checkpoint { .. } => {}
            SessionEvent::Finished { .. } => {}
        }
    }
}

/// Styled one-line report of a finished session.
pub fn print_outcome(state: &SessionState) {
    let marker = match state.status {
        SessionStatus::Completed => style("✓").green(),
        SessionStatus::Stopped => style("!").yellow(),
        _ => style("✗").red(),
    };
    println!(
        "{} {} {} with {} posts",
        marker,
        style(short_id(&state.id)).cyan(),
        state.status,
        state.collected
    );
    if let Some(path) = state.output_path() {
        println!("  {:<12} {}", "Output:", path.display());
    }
    if let Some(ref error) = state.last_error {
        println!("  {:<12} {}", "Last error:", error);
    }
    if state.status != SessionStatus::Completed {
        println!(
            "  {:<12} postharvest resume {}",
            "Continue:",
            short_id(&state.id)
        );
    }
}

/// Print the summary of what a session exported.
pub fn print_analytics(session: &SessionState) {
    let a = match ScrapeAnalytics::for_session(session) {
        Ok(a) => a,
        Err(e) => {
            println!("  {} Summary unavailable: {}", style("!").yellow(), e);
            return;
        }
    };
    if a.total == 0 {
        return;
    }

    println!("\n{}", style("Summary").bold());
    println!(
        "  {:<20} {} from {} account(s) over {} day(s), {:.1}/day",
        "Posts:", a.total, a.unique_authors, a.span_days, a.posts_per_day
    );
    println!(
        "  {:<20} {} likes, {} reposts, {} replies, {} views",
        "Engagement:", a.total_likes, a.total_reposts, a.total_replies, a.total_views
    );
    println!(
        "  {:<20} {:.1} likes, {:.1} reposts, {:.1} replies",
        "Average:", a.avg_likes, a.avg_reposts, a.avg_replies
    );
    if let Some(ref top) = a.top_post {
        println!("  {:<20} {} likes, {}", "Top post:", top.likes, top.link);
        println!("  {:<20} {}", "", style(&top.excerpt).dim());
    }
    if let (Some(day), Some(hour)) = (a.most_active_day, a.most_active_hour) {
        println!("  {:<20} {}, {:02}:00 UTC", "Most active:", day, hour);
    }
    println!(
        "  {:<20} {} with media, {} with links, {} replies, {} reposts, {:.0} chars avg",
        "Content:", a.with_media, a.with_links, a.replies, a.reposts, a.avg_text_chars
    );
    if session.query.backend == BackendKind::Api {
        println!(
            "  {:<20} {}",
            "API cost:",
            format_cost(estimate_cost(session.collected))
        );
    }
}
