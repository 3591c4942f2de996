//! Session listing, inspection and resumption.

use console::style;

use super::helpers::{print_analytics, print_outcome, Runtime};
use crate::config::Settings;
use crate::models::{short_id, SessionState, SessionStatus};
use crate::store::{FileSessionStore, SessionStore};

fn open_store(settings: &Settings) -> anyhow::Result<FileSessionStore> {
    settings.ensure_directories()?;
    Ok(FileSessionStore::new(&settings.sessions_dir)?)
}

fn styled_status(status: SessionStatus) -> String {
    let padded = format!("{:<20}", status);
    match status {
        SessionStatus::Completed => style(padded).green().to_string(),
        SessionStatus::Failed => style(padded).red().to_string(),
        SessionStatus::Stopped => style(padded).dim().to_string(),
        _ => style(padded).yellow().to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// List resumable sessions, or every session with `all`.
pub async fn cmd_sessions(settings: &Settings, all: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    let sessions = if all {
        let report = store.scan().await?;
        for (id, reason) in &report.corrupt {
            println!("{} Unreadable session {}: {}", style("!").yellow(), id, reason);
        }
        let mut sessions = report.sessions;
        sessions.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        sessions
    } else {
        store.list_resumable().await?
    };

    if sessions.is_empty() {
        let what = if all { "sessions" } else { "resumable sessions" };
        println!("{} No {} found", style("!").yellow(), what);
        return Ok(());
    }

    println!("\n{}", style("Sessions").bold());
    println!(
        "  {:<10} {:<20} {:<32} {:>9}  {}",
        "ID", "STATUS", "TARGET", "POSTS", "LAST ACTIVITY"
    );
    for session in &sessions {
        println!(
            "  {:<10} {} {:<32} {:>9}  {}",
            short_id(&session.id),
            styled_status(session.status),
            truncate(&session.query.describe(), 32),
            session.collected,
            session
                .last_activity()
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Print every field of one session.
pub async fn cmd_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let session = store.find(id).await?;
    let query = &session.query;

    println!("\n{}", style(format!("Session {}", session.id)).bold());
    println!("  {:<20} {}", "Status:", styled_status(session.status));
    println!("  {:<20} {}", "Mode:", query.mode.as_str());
    println!("  {:<20} {}", "Target:", query.describe());
    println!("  {:<20} {}", "Backend:", query.backend);
    println!("  {:<20} {}", "Format:", query.format);
    if !query.window.is_open() {
        let bound = |b: Option<chrono::NaiveDateTime>| {
            b.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "  {:<20} {} to {}",
            "Window:",
            bound(query.window.start),
            bound(query.window.end)
        );
    }
    if !query.filters.is_empty() {
        let f = &query.filters;
        println!(
            "  {:<20} likes>={} reposts>={} replies>={}{}{}{}",
            "Filters:",
            f.min_likes,
            f.min_reposts,
            f.min_replies,
            if f.exclude_replies { " no-replies" } else { "" },
            if f.exclude_reposts { " no-reposts" } else { "" },
            if f.media_only { " media-only" } else { "" }
        );
    }
    println!("  {:<20} {}", "Collected:", session.collected);
    println!(
        "  {:<20} {}",
        "Cursor:",
        session.cursor.as_deref().unwrap_or("(start)")
    );
    println!("  {:<20} {}", "Created:", session.created_at.to_rfc3339());
    if let Some(at) = session.checkpointed_at {
        println!("  {:<20} {}", "Last checkpoint:", at.to_rfc3339());
    }
    for path in &session.output_paths {
        println!("  {:<20} {}", "Output:", path.display());
    }
    if let Some(ref previous) = session.supersedes {
        println!("  {:<20} {}", "Continues:", previous);
    }
    if let Some(ref error) = session.last_error {
        println!("  {:<20} {}", "Last error:", style(error).red());
    }
    print_analytics(&session);
    Ok(())
}

/// Resume one session (by id, or the most recent), or every resumable one.
///
/// A finished session continues in a new session that supersedes it.
pub async fn cmd_resume(
    settings: &Settings,
    id: Option<&str>,
    all: bool,
    no_prompt: bool,
) -> anyhow::Result<()> {
    let runtime = Runtime::start(settings)?;

    let targets: Vec<SessionState> = if all {
        runtime.store.list_resumable().await?
    } else if let Some(id) = id {
        vec![runtime.store.find(id).await?]
    } else {
        runtime
            .store
            .list_resumable()
            .await?
            .into_iter()
            .take(1)
            .collect()
    };

    if targets.is_empty() {
        runtime.finish().await;
        println!("{} No resumable sessions found", style("!").yellow());
        return Ok(());
    }

    let mut failures = 0;
    for session in targets {
        if runtime.cancel.is_cancelled() {
            break;
        }

        let controller = runtime.controller(&session.query, no_prompt)?;
        let result = if session.status.is_terminal() {
            runtime.progress.suspend(|| {
                println!(
                    "{} Session {} is {}, continuing it in a new session",
                    style("→").cyan(),
                    short_id(&session.id),
                    session.status
                )
            });
            controller.retry(&session).await
        } else {
            runtime.progress.suspend(|| {
                println!("{} Resuming {}", style("→").cyan(), session.summary())
            });
            controller.resume(session).await
        };

        match result {
            Ok(state) => runtime.progress.suspend(|| print_outcome(&state)),
            Err(e) => {
                failures += 1;
                runtime
                    .progress
                    .suspend(|| println!("{} {}", style("✗").red(), e));
            }
        }
    }

    runtime.finish().await;
    if failures > 0 {
        anyhow::bail!("{} session(s) could not be resumed", failures);
    }
    Ok(())
}
