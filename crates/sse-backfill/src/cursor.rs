//! Cursor selection: the pure, no-IO decision tree that picks historical vs
//! incremental backfill mode (§4.D "Cursor selection (historical vs
//! incremental — critical)"). Kept as a standalone function so the five
//! ordered rules can be unit-tested without a database, mirroring the
//! teacher's separation of pure decision logic (`mqk-reconcile::gate`) from
//! the I/O shell that calls it.

use sse_schemas::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorDecision {
    pub created_gte: Option<i64>,
    pub starting_after: Option<String>,
}

impl CursorDecision {
    fn no_filter() -> Self {
        CursorDecision { created_gte: None, starting_after: None }
    }
}

/// Applies the five ordered rules from §4.D. `last_cursor_before_run` is the
/// boundary from [`sse_db::get_last_cursor_before_run`] — prior *completed*
/// runs only, never the current run's own in-flight cursor.
pub fn select_cursor_strategy(
    explicit_created_gte: Option<i64>,
    supports_created_filter: bool,
    page_cursor: Option<&str>,
    last_cursor_before_run: Option<&Cursor>,
) -> CursorDecision {
    // Rule 1: an explicit caller-supplied filter wins outright.
    if let Some(gte) = explicit_created_gte {
        return CursorDecision { created_gte: Some(gte), starting_after: None };
    }

    // Rule 2: kinds that require customer context ignore `created` entirely.
    if !supports_created_filter {
        return CursorDecision::no_filter();
    }

    // Rule 3: mid-historical-backfill — continue the same page traversal and
    // deliberately do NOT set created.gte, even if the run's own cursor has
    // since advanced (that would collapse the list to only the newest page).
    if let Some(pc) = page_cursor {
        return CursorDecision { created_gte: None, starting_after: Some(pc.to_string()) };
    }

    // Rule 4: incremental catch-up since the last successful run.
    if let Some(cursor) = last_cursor_before_run {
        if cursor.is_numeric() {
            if let Ok(gte) = cursor.as_str().parse::<i64>() {
                return CursorDecision { created_gte: Some(gte), starting_after: None };
            }
        }
        tracing::warn!(
            cursor = cursor.as_str(),
            "last-completed cursor is non-numeric; cannot express as a created.gte filter, falling back to unfiltered list"
        );
    }

    // Rule 5: fresh historical backfill.
    CursorDecision::no_filter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule1_explicit_filter_wins_over_everything() {
        let decision = select_cursor_strategy(
            Some(42),
            true,
            Some("cn_2"),
            Some(&Cursor::new("1700000200")),
        );
        assert_eq!(decision, CursorDecision { created_gte: Some(42), starting_after: None });
    }

    #[test]
    fn rule2_unsupported_created_filter_ignores_everything_else() {
        let decision = select_cursor_strategy(None, false, Some("cn_2"), Some(&Cursor::new("1700000200")));
        assert_eq!(decision, CursorDecision::no_filter());
    }

    #[test]
    fn rule3_page_cursor_present_continues_historical_without_created_filter() {
        let decision = select_cursor_strategy(None, true, Some("cn_2"), Some(&Cursor::new("1700000200")));
        assert_eq!(
            decision,
            CursorDecision { created_gte: None, starting_after: Some("cn_2".to_string()) }
        );
    }

    #[test]
    fn rule4_last_completed_cursor_feeds_incremental_catch_up() {
        let decision = select_cursor_strategy(None, true, None, Some(&Cursor::new("1700000200")));
        assert_eq!(decision, CursorDecision { created_gte: Some(1_700_000_200), starting_after: None });
    }

    #[test]
    fn rule5_fresh_backfill_has_no_filter_at_all() {
        let decision = select_cursor_strategy(None, true, None, None);
        assert_eq!(decision, CursorDecision::no_filter());
    }

    #[test]
    fn non_numeric_last_cursor_falls_back_to_unfiltered_list() {
        let decision = select_cursor_strategy(None, true, None, Some(&Cursor::new("cn_9")));
        assert_eq!(decision, CursorDecision::no_filter());
    }

    // Historical-then-incremental end-to-end scenario from §8: run A ends
    // mid-page (page_cursor = cn_2), run B continues historical without a
    // created filter, run C (no page_cursor left) picks up incrementally.
    #[test]
    fn historical_then_incremental_handoff_across_three_runs() {
        let run_a = select_cursor_strategy(None, true, None, None);
        assert_eq!(run_a, CursorDecision::no_filter());

        let run_b = select_cursor_strategy(None, true, Some("cn_2"), Some(&Cursor::new("1700000200")));
        assert_eq!(
            run_b,
            CursorDecision { created_gte: None, starting_after: Some("cn_2".to_string()) }
        );

        let run_c = select_cursor_strategy(None, true, None, Some(&Cursor::new("1700000200")));
        assert_eq!(run_c, CursorDecision { created_gte: Some(1_700_000_200), starting_after: None });
    }
}
