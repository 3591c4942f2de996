//! Scrape and batch commands.

use std::path::{Path, PathBuf};

use console::style;

use super::helpers::{print_analytics, print_outcome, Runtime};
use super::QueryArgs;
use crate::config::{BreakConfig, Settings};
use crate::fetchers::{estimate_cost, estimate_posts, format_cost};
use crate::models::{BackendKind, EngagementFilters, QueryMode, ScrapeQuery, SessionStatus, TimeWindow};
use crate::session::{parse_identity_list, BatchOutcome, BatchRunner};

/// What a scrape targets, as given on the command line.
pub struct Targets {
    pub users: Vec<String>,
    pub keywords: Vec<String>,
    pub all_keywords: bool,
    pub links: Vec<String>,
    pub links_file: Option<PathBuf>,
}

/// Settings with `--breaks` applied.
fn effective_settings(settings: &Settings, args: &QueryArgs) -> Settings {
    let mut settings = settings.clone();
    if args.breaks && settings.breaks.is_none() {
        settings.breaks = BreakConfig {
            enabled: true,
            ..Default::default()
        }
        .policy();
    }
    settings
}

/// Apply window, filters, backend and format options to `query`.
fn apply_args(
    query: ScrapeQuery,
    args: &QueryArgs,
    settings: &Settings,
) -> anyhow::Result<ScrapeQuery> {
    let window = TimeWindow::parse(args.since.as_deref(), args.until.as_deref())?;
    let filters = EngagementFilters {
        min_likes: args.min_likes,
        min_reposts: args.min_reposts,
        min_replies: args.min_replies,
        exclude_replies: args.no_replies,
        exclude_reposts: args.no_reposts,
        media_only: args.media_only,
    };
    Ok(query
        .with_window(window)
        .with_filters(filters)
        .with_backend(args.backend.unwrap_or(settings.default_backend))
        .with_format(args.format.unwrap_or(settings.default_format)))
}

fn read_list(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
}

fn build_query(targets: &Targets, args: &QueryArgs, settings: &Settings) -> anyhow::Result<ScrapeQuery> {
    let mut links = targets.links.clone();
    if let Some(ref path) = targets.links_file {
        links.extend(
            read_list(path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    let given = [
        !targets.users.is_empty(),
        !targets.keywords.is_empty(),
        !links.is_empty(),
    ]
    .iter()
    .filter(|given| **given)
    .count();
    if given != 1 {
        anyhow::bail!("Give exactly one kind of target: --user, --keyword, or --link/--links-file");
    }

    let query = if !targets.users.is_empty() {
        ScrapeQuery::new(QueryMode::Identity, &targets.users)?
    } else if !targets.keywords.is_empty() {
        ScrapeQuery::new(QueryMode::Keywords, &targets.keywords)?
            .with_match_all(targets.all_keywords)
    } else {
        ScrapeQuery::new(QueryMode::Links, &links)?
    };
    apply_args(query, args, settings)
}

/// Start one new session and run it to the end.
pub async fn cmd_scrape(settings: &Settings, targets: Targets, args: &QueryArgs) -> anyhow::Result<()> {
    let settings = effective_settings(settings, args);
    let query = build_query(&targets, args, &settings)?;

    println!(
        "{} Scraping {} via {} into {}",
        style("→").cyan(),
        style(query.describe()).bold(),
        query.backend,
        settings.exports_dir.display()
    );
    if query.backend == BackendKind::Api {
        match estimate_posts(&query) {
            Some(posts) => println!(
                "  {:<20} {} for about {} posts",
                "Estimated cost:",
                format_cost(estimate_cost(posts)),
                posts
            ),
            None => println!(
                "  {:<20} {} per 1000 posts",
                "API cost:",
                format_cost(estimate_cost(1000))
            ),
        }
    }

    let runtime = Runtime::start(&settings)?;
    let result = {
        let controller = runtime.controller(&query, args.no_prompt)?;
        controller.run(query, None).await
    };
    runtime.finish().await;

    let state = result?;
    print_outcome(&state);
    if state.status == SessionStatus::Completed {
        print_analytics(&state);
    }
    Ok(())
}

/// One session per account from arguments and/or a list file.
pub async fn cmd_batch(
    settings: &Settings,
    identities: Vec<String>,
    file: Option<PathBuf>,
    concurrency: usize,
    args: &QueryArgs,
) -> anyhow::Result<()> {
    let settings = effective_settings(settings, args);

    let mut list = identities.join("\n");
    if let Some(ref path) = file {
        list.push('\n');
        list.push_str(&read_list(path)?);
    }
    let identities = parse_identity_list(&list);
    if identities.is_empty() {
        anyhow::bail!("No accounts given");
    }

    let template = apply_args(
        ScrapeQuery::new(QueryMode::Identity, [identities[0].as_str()])?,
        args,
        &settings,
    )?;

    println!(
        "{} Scraping {} accounts via {}, {} at a time",
        style("→").cyan(),
        identities.len(),
        template.backend,
        concurrency.max(1)
    );

    let runtime = Runtime::start(&settings)?;
    let outcomes = {
        let controller = runtime.controller(&template, args.no_prompt)?;
        BatchRunner::new(controller)
            .with_concurrency(concurrency)
            .run(&template, &identities)
            .await
    };
    runtime.finish().await;

    println!("\n{}", style("Batch results").bold());
    let mut completed = 0;
    for outcome in &outcomes {
        match outcome {
            BatchOutcome::Finished { state, .. } => {
                if state.status == SessionStatus::Completed {
                    completed += 1;
                }
                print_outcome(state);
            }
            BatchOutcome::Failed { identity, error } => {
                println!("{} @{}: {}", style("✗").red(), identity, error);
            }
            BatchOutcome::Skipped { identity } => {
                println!("{} @{} not started", style("○").dim(), identity);
            }
        }
    }
    println!(
        "\n{} {}/{} accounts completed",
        style("✓").green(),
        completed,
        outcomes.len()
    );
    Ok(())
}
