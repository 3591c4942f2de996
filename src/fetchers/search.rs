//! Backend search string construction.
//!
//! Both backends accept the same advanced search operators. Filters that the
//! backend can apply server-side are pushed down; the controller still
//! applies every filter client-side.

use chrono::Duration;

use crate::models::{QueryMode, ScrapeQuery};

/// Build the advanced search string for identity and keyword queries.
pub fn build_search_query(query: &ScrapeQuery) -> String {
    let mut parts = Vec::new();

    match query.mode {
        QueryMode::Identity => {
            let from: Vec<String> = query.targets.iter().map(|t| format!("from:{}", t)).collect();
            parts.push(format!("({})", from.join(" OR ")));
        }
        QueryMode::Keywords => {
            let quoted: Vec<String> = query
                .targets
                .iter()
                .map(|k| format!("\"{}\"", k.replace('"', "")))
                .collect();
            let joiner = if query.match_all { " AND " } else { " OR " };
            parts.push(format!("({})", quoted.join(joiner)));
        }
        QueryMode::Links => {}
    }

    if let Some(start) = query.window.start {
        parts.push(format!("since:{}", start.format("%Y-%m-%d")));
    }
    if let Some(end) = query.window.end {
        // `until:` is exclusive.
        let until = end.date() + Duration::days(1);
        parts.push(format!("until:{}", until.format("%Y-%m-%d")));
    }

    let filters = &query.filters;
    if filters.exclude_replies {
        parts.push("-filter:replies".to_string());
    }
    if filters.exclude_reposts {
        parts.push("-filter:nativeretweets".to_string());
    }
    if filters.media_only {
        parts.push("filter:media".to_string());
    }
    if filters.min_likes > 0 {
        parts.push(format!("min_faves:{}", filters.min_likes));
    }
    if filters.min_reposts > 0 {
        parts.push(format!("min_retweets:{}", filters.min_reposts));
    }
    if filters.min_replies > 0 {
        parts.push(format!("min_replies:{}", filters.min_replies));
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngagementFilters, TimeWindow};

    #[test]
    fn test_identity_query_with_window() {
        let query = ScrapeQuery::new(QueryMode::Identity, ["alice"])
            .unwrap()
            .with_window(TimeWindow::parse(Some("2024-01-01"), Some("2024-01-31")).unwrap());
        assert_eq!(
            build_search_query(&query),
            "(from:alice) since:2024-01-01 until:2024-02-01"
        );
    }

    #[test]
    fn test_keyword_query_with_filters() {
        let query = ScrapeQuery::new(QueryMode::Keywords, ["rust lang", "tokio"])
            .unwrap()
            .with_match_all(true)
            .with_filters(EngagementFilters {
                min_likes: 10,
                exclude_replies: true,
                media_only: true,
                ..Default::default()
            });
        assert_eq!(
            build_search_query(&query),
            "(\"rust lang\" AND \"tokio\") -filter:replies filter:media min_faves:10"
        );
    }

    #[test]
    fn test_multiple_identities_are_ored() {
        let query = ScrapeQuery::new(QueryMode::Identity, ["a", "b"]).unwrap();
        assert_eq!(build_search_query(&query), "(from:a OR from:b)");
    }
}
