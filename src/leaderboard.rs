// Leaderboards: per-request ranked boards (global / weekly / friends)
// and the shared top board pushed to every client after taps.

use std::collections::HashMap;

use spacetimedb::{reducer, ReducerContext, ScheduleAt, Table, Timestamp};

use crate::config::*;
use crate::errors::GameError;
use crate::{leaderboard_broadcast_schedule, leaderboard_entry, tap_event, top_player, user_account};
use crate::{LeaderboardBroadcastSchedule, LeaderboardEntry, LeaderboardKind, TopPlayer, User};

impl LeaderboardKind {
    pub fn parse(raw: &str) -> Result<Self, GameError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(LeaderboardKind::Global),
            "weekly" => Ok(LeaderboardKind::Weekly),
            "friends" => Ok(LeaderboardKind::Friends),
            _ => Err(GameError::validation("type", "must be one of global, weekly, friends")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub position: u32,
    pub user_id: u64,
    pub display_name: String,
    pub score: u64,
}

/// Order by score descending and number positions 1..N.
/// The sort is stable, so equal scores keep the order they were read in.
pub fn rank(mut scored: Vec<(u64, String, u64)>, limit: usize) -> Vec<RankedRow> {
    scored.sort_by(|a, b| b.2.cmp(&a.2));
    scored.into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (user_id, display_name, score))| RankedRow {
            position: i as u32 + 1,
            user_id,
            display_name,
            score,
        })
        .collect()
}

/// Sum points per user over tap events at or after `since`.
/// Output keeps first-seen order so ranking ties stay stable.
pub fn weekly_totals<I>(events: I, since: Timestamp) -> Vec<(u64, u64)>
where
    I: IntoIterator<Item = (u64, u64, Timestamp)>,
{
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut totals: Vec<(u64, u64)> = Vec::new();
    for (user_id, points, created_at) in events {
        if created_at < since {
            continue;
        }
        match index.get(&user_id) {
            Some(&i) => totals[i].1 = totals[i].1.saturating_add(points),
            None => {
                index.insert(user_id, totals.len());
                totals.push((user_id, points));
            }
        }
    }
    totals
}

fn validate_limit(limit: u32) -> Result<usize, GameError> {
    if (LEADERBOARD_MIN_LIMIT..=LEADERBOARD_MAX_LIMIT).contains(&limit) {
        Ok(limit as usize)
    } else {
        Err(GameError::validation(
            "limit",
            format!("must be between {} and {}", LEADERBOARD_MIN_LIMIT, LEADERBOARD_MAX_LIMIT),
        ))
    }
}

fn score_by_points(users: impl Iterator<Item = User>) -> Vec<(u64, String, u64)> {
    users.map(|u| (u.id, crate::display_name(&u), u.points)).collect()
}

fn compute_board(ctx: &ReducerContext, viewer: &User, kind: LeaderboardKind, limit: usize) -> Vec<RankedRow> {
    match kind {
        LeaderboardKind::Global => rank(score_by_points(ctx.db.user_account().iter()), limit),
        LeaderboardKind::Weekly => {
            let since = Timestamp::from_micros_since_unix_epoch(
                ctx.timestamp.to_micros_since_unix_epoch() - WEEKLY_WINDOW_SECS * 1_000_000,
            );
            let totals = weekly_totals(
                ctx.db.tap_event().iter().map(|e| (e.user_id, e.points_earned, e.created_at)),
                since,
            );
            let scored = totals.into_iter()
                .map(|(user_id, score)| {
                    let name = ctx.db.user_account()
                        .id()
                        .find(&user_id)
                        .map(|u| crate::display_name(&u))
                        .unwrap_or_else(|| DISPLAY_NAME_FALLBACK.to_string());
                    (user_id, name, score)
                })
                .collect();
            rank(scored, limit)
        }
        LeaderboardKind::Friends => {
            // The viewer plus everyone they referred directly (one level)
            let circle = ctx.db.user_account()
                .iter()
                .filter(|u| u.id == viewer.id || u.referred_by_id == Some(viewer.id));
            rank(score_by_points(circle), limit)
        }
    }
}

/// Build the caller's leaderboard into leaderboard_entry (rows keyed by viewer)
#[reducer]
pub fn request_leaderboard(ctx: &ReducerContext, kind: String, limit: u32) -> Result<(), String> {
    let kind = LeaderboardKind::parse(&kind)?;
    let limit = validate_limit(limit)?;
    let viewer = crate::load_synced_user(ctx)?;

    let stale: Vec<_> = ctx.db.leaderboard_entry()
        .viewer_id()
        .filter(&viewer.id)
        .map(|e| e.id)
        .collect();
    for id in stale {
        ctx.db.leaderboard_entry().id().delete(&id);
    }

    let rows = compute_board(ctx, &viewer, kind, limit);
    let count = rows.len();
    for row in rows {
        ctx.db.leaderboard_entry().insert(LeaderboardEntry {
            id: 0, // auto_inc
            viewer_id: viewer.id,
            kind,
            position: row.position,
            user_id: row.user_id,
            display_name: row.display_name,
            score: row.score,
        });
    }

    log::debug!("[LEADERBOARD] user:{} kind:{:?} limit:{} rows:{}", viewer.id, kind, limit, count);
    Ok(())
}

/// Queue a shared top board refresh unless one is already pending
/// The refresh is a separate transaction, so it can never undo the tap that triggered it
pub fn schedule_broadcast(ctx: &ReducerContext) {
    if ctx.db.leaderboard_broadcast_schedule().iter().next().is_some() {
        return;
    }
    let at = ctx.timestamp + std::time::Duration::from_millis(LEADERBOARD_BROADCAST_DELAY_MS);
    ctx.db.leaderboard_broadcast_schedule().insert(LeaderboardBroadcastSchedule {
        id: 0, // auto_inc
        scheduled_at: ScheduleAt::Time(at.into()),
    });
}

/// Recompute the shared top board (scheduled reducer)
#[reducer]
pub fn broadcast_leaderboard(ctx: &ReducerContext, _schedule: LeaderboardBroadcastSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call broadcast_leaderboard", ctx.sender);
        return;
    }

    let rows = rank(score_by_points(ctx.db.user_account().iter()), TOP_BOARD_SIZE);

    let old: Vec<_> = ctx.db.top_player().iter().map(|t| t.position).collect();
    for position in old {
        ctx.db.top_player().position().delete(&position);
    }
    for row in rows {
        ctx.db.top_player().insert(TopPlayer {
            position: row.position,
            user_id: row.user_id,
            display_name: row.display_name,
            points: row.score,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::tests::ts;

    #[test]
    fn test_rank_orders_and_truncates() {
        let scored = vec![
            (1, "a".to_string(), 50),
            (2, "b".to_string(), 300),
            (3, "c".to_string(), 120),
            (4, "d".to_string(), 10),
        ];
        let rows = rank(scored, 3);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|r| r.user_id).collect::<Vec<_>>(), vec![2, 3, 1]);
        assert_eq!(rows.iter().map(|r| r.position).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rank_ties_keep_read_order() {
        let scored = vec![
            (9, "x".to_string(), 100),
            (4, "y".to_string(), 100),
            (7, "z".to_string(), 200),
        ];
        let rows = rank(scored, 10);
        assert_eq!(rows.iter().map(|r| r.user_id).collect::<Vec<_>>(), vec![7, 9, 4]);
    }

    #[test]
    fn test_weekly_totals_window() {
        let since = ts(1_000);
        let events = vec![
            (1, 10, ts(999)),   // too old
            (1, 20, ts(1_000)),
            (2, 5, ts(1_500)),
            (1, 30, ts(2_000)),
            (3, 0, ts(500)),    // too old, user 3 never appears
        ];
        let totals = weekly_totals(events, since);
        assert_eq!(totals, vec![(1, 50), (2, 5)]);

        let rows = rank(totals.into_iter().map(|(id, s)| (id, String::new(), s)).collect(), 100);
        assert_eq!(rows[0].user_id, 1);
        assert_eq!(rows[0].score, 50);
    }

    #[test]
    fn test_kind_and_limit_validation() {
        assert_eq!(LeaderboardKind::parse("Weekly"), Ok(LeaderboardKind::Weekly));
        assert_eq!(LeaderboardKind::parse(" friends "), Ok(LeaderboardKind::Friends));
        assert!(LeaderboardKind::parse("monthly").is_err());

        assert!(validate_limit(2).is_err());
        assert_eq!(validate_limit(3), Ok(3));
        assert_eq!(validate_limit(100), Ok(100));
        assert!(validate_limit(101).is_err());
    }
}
