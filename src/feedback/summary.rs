//! Read-side summaries over recorded entries: daily activity and timelines.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::types::{ActivitySummary, FeedbackEntry, TimelineEvent, TimelineFilter};
use crate::stats;
use crate::store::CounterSnapshot;

/// Number of equal time windows used for the consistency score.
pub const CONSISTENCY_WINDOWS: usize = 5;

/// Summarize the entries recorded on `date` (UTC). `entries` must be in key order.
pub fn daily_activity<'a>(
    date: NaiveDate,
    entries: impl IntoIterator<Item = &'a FeedbackEntry>,
) -> ActivitySummary {
    let day: Vec<&FeedbackEntry> = entries
        .into_iter()
        .filter(|e| e.recorded_at.date_naive() == date)
        .collect();

    let mut by_category: BTreeMap<_, CounterSnapshot> = BTreeMap::new();
    let mut by_tool: BTreeMap<String, CounterSnapshot> = BTreeMap::new();
    let mut longest_streak = 0;
    let mut streak = 0;

    for entry in &day {
        bump(by_category.entry(entry.category).or_default(), entry.success);
        if let Some(tool) = entry.context.tool_name() {
            bump(by_tool.entry(tool.to_string()).or_default(), entry.success);
        }

        if entry.success {
            streak += 1;
            longest_streak = longest_streak.max(streak);
        } else {
            streak = 0;
        }
    }

    let successes = day.iter().filter(|e| e.success).count();
    ActivitySummary {
        date,
        total: day.len(),
        successes,
        failures: day.len() - successes,
        success_rate: stats::success_rate(day.iter().map(|e| e.success)).unwrap_or(0.0),
        by_category,
        by_tool,
        longest_success_streak: longest_streak,
        consistency_score: consistency_score(&day),
    }
}

fn bump(counter: &mut CounterSnapshot, success: bool) {
    counter.total += 1;
    if success {
        counter.success += 1;
    }
}

/// `max(0, 1 − 2σ)` of the per-window success rate.
///
/// The span between the first and last entry is cut into
/// [`CONSISTENCY_WINDOWS`] equal windows; empty windows are ignored. No
/// entries scores 0.
pub fn consistency_score(entries: &[&FeedbackEntry]) -> f64 {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return 0.0;
    };

    let start = first.recorded_at;
    let span_ms = (last.recorded_at - start).num_milliseconds().max(0);

    let mut windows = [(0usize, 0usize); CONSISTENCY_WINDOWS];
    for entry in entries {
        let offset = (entry.recorded_at - start).num_milliseconds().max(0);
        let index = if span_ms == 0 {
            0
        } else {
            ((offset as i128 * CONSISTENCY_WINDOWS as i128) / span_ms as i128) as usize
        };
        let slot = &mut windows[index.min(CONSISTENCY_WINDOWS - 1)];
        slot.0 += 1;
        if entry.success {
            slot.1 += 1;
        }
    }

    let rates: Vec<f64> = windows
        .iter()
        .filter(|(total, _)| *total > 0)
        .map(|(total, success)| *success as f64 / *total as f64)
        .collect();

    (1.0 - 2.0 * stats::std_dev(&rates)).max(0.0)
}

/// Filtered chronological view. With a limit, the most recent matches are
/// kept, still in chronological order. `entries` must be in key order.
pub fn timeline<'a>(
    filter: &TimelineFilter,
    entries: impl DoubleEndedIterator<Item = &'a FeedbackEntry>,
) -> Vec<TimelineEvent> {
    let limit = filter.limit.unwrap_or(usize::MAX);
    let mut events: Vec<TimelineEvent> = entries
        .rev()
        .filter(|e| filter.category.map_or(true, |c| e.category == c))
        .filter(|e| filter.success.map_or(true, |s| e.success == s))
        .filter(|e| {
            filter
                .tool
                .as_deref()
                .map_or(true, |t| e.context.tool_name() == Some(t))
        })
        .filter(|e| filter.since.map_or(true, |since| e.recorded_at >= since))
        .take(limit)
        .map(|e| TimelineEvent {
            entry_id: e.id.clone(),
            timestamp: e.recorded_at,
            category: e.category,
            success: e.success,
            tool: e.context.tool_name().map(str::to_string),
            summary: e.describe(),
        })
        .collect();
    events.reverse();
    events
}
