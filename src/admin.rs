// Admin catalog management, boosters, daily cipher and airdrop batches

use spacetimedb::{reducer, ReducerContext, SpacetimeType, Table, Timestamp};

use crate::config::*;
use crate::errors::GameError;
use crate::{airdrop_snapshot, daily_cipher, special_event, task, upgrade, user_account};
use crate::{AirdropSnapshot, DailyCipher, Role, SpecialEvent, Task, TaskType, Upgrade};
use crate::economy;

#[derive(SpacetimeType, Clone, Debug)]
pub struct UpgradeSpec {
    pub key: String,
    pub name: String,
    pub description: String,
    pub base_cost: u64,
    pub max_level: u32,
    pub difficulty: f64,
    pub unlock_level: u32,
    pub stars_price: Option<u32>,
    pub pph_boost: u64,
    pub tap_boost: u32,
    pub energy_boost: u32,
    pub auto_tap_boost: u64,
    pub is_listed: bool,
}

#[derive(SpacetimeType, Clone, Debug)]
pub struct TaskSpec {
    pub key: String,
    pub title: String,
    pub task_type: TaskType,
    pub reward: u64,
    pub link: Option<String>,
    pub is_daily: bool,
    pub is_active: bool,
}

#[derive(SpacetimeType, Clone, Debug)]
pub struct EventSpec {
    pub key: String,
    pub title: String,
    pub description: String,
    pub multiplier: f64,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub is_active: bool,
}

fn non_empty(field: &'static str, value: &str) -> Result<String, GameError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(GameError::validation(field, "must not be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn validate_upgrade(spec: &UpgradeSpec) -> Result<(), GameError> {
    non_empty("key", &spec.key)?;
    non_empty("name", &spec.name)?;
    if spec.base_cost == 0 {
        return Err(GameError::validation("base_cost", "must be positive"));
    }
    if spec.max_level == 0 {
        return Err(GameError::validation("max_level", "must be at least 1"));
    }
    if !spec.difficulty.is_finite() || spec.difficulty <= 0.0 {
        return Err(GameError::validation("difficulty", "must be a positive number"));
    }
    if spec.stars_price == Some(0) {
        return Err(GameError::validation("stars_price", "must be positive when set"));
    }
    Ok(())
}

pub fn validate_task(spec: &TaskSpec) -> Result<(), GameError> {
    non_empty("key", &spec.key)?;
    non_empty("title", &spec.title)?;
    if spec.reward == 0 {
        return Err(GameError::validation("reward", "must be positive"));
    }
    Ok(())
}

/// Booster windows: multiplier within bounds and a strictly positive duration
pub fn validate_event(spec: &EventSpec) -> Result<(), GameError> {
    non_empty("key", &spec.key)?;
    non_empty("title", &spec.title)?;
    if !(EVENT_MIN_MULTIPLIER..=EVENT_MAX_MULTIPLIER).contains(&spec.multiplier) {
        return Err(GameError::validation(
            "multiplier",
            format!("must be between {} and {}", EVENT_MIN_MULTIPLIER, EVENT_MAX_MULTIPLIER),
        ));
    }
    if spec.ends_at <= spec.starts_at {
        return Err(GameError::InvalidEventWindow);
    }
    Ok(())
}

pub fn parse_role(raw: &str) -> Result<Role, GameError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "USER" => Ok(Role::User),
        "ADMIN" => Ok(Role::Admin),
        _ => Err(GameError::validation("role", "must be USER or ADMIN")),
    }
}

/// Insert or replace an upgrade by key (shared with bulk import)
pub(crate) fn store_upgrade(ctx: &ReducerContext, spec: UpgradeSpec) -> bool {
    let key = spec.key.trim().to_string();
    let existing = ctx.db.upgrade().key().find(&key);
    let row = Upgrade {
        id: existing.as_ref().map(|u| u.id).unwrap_or(0),
        key,
        name: spec.name.trim().to_string(),
        description: spec.description,
        base_cost: spec.base_cost,
        max_level: spec.max_level,
        difficulty: spec.difficulty,
        unlock_level: spec.unlock_level,
        stars_price: spec.stars_price,
        pph_boost: spec.pph_boost,
        tap_boost: spec.tap_boost,
        energy_boost: spec.energy_boost,
        auto_tap_boost: spec.auto_tap_boost,
        is_listed: spec.is_listed,
    };
    match existing {
        Some(_) => {
            ctx.db.upgrade().id().update(row);
            false
        }
        None => {
            ctx.db.upgrade().insert(row);
            true
        }
    }
}

/// Insert or replace a task by key (shared with bulk import)
pub(crate) fn store_task(ctx: &ReducerContext, spec: TaskSpec) -> bool {
    let key = spec.key.trim().to_string();
    let existing = ctx.db.task().key().find(&key);
    let row = Task {
        id: existing.as_ref().map(|t| t.id).unwrap_or(0),
        key,
        title: spec.title.trim().to_string(),
        task_type: spec.task_type,
        reward: spec.reward,
        link: spec.link.filter(|l| !l.trim().is_empty()),
        is_daily: spec.is_daily,
        is_active: spec.is_active,
    };
    match existing {
        Some(_) => {
            ctx.db.task().id().update(row);
            false
        }
        None => {
            ctx.db.task().insert(row);
            true
        }
    }
}

#[reducer]
pub fn upsert_upgrade(ctx: &ReducerContext, spec: UpgradeSpec) -> Result<(), String> {
    crate::require_admin(ctx, "upsert_upgrade")?;
    validate_upgrade(&spec)?;
    let key = spec.key.trim().to_string();
    let created = store_upgrade(ctx, spec);
    log::info!("[ADMIN] upgrade {} {}", key, if created { "created" } else { "updated" });
    Ok(())
}

#[reducer]
pub fn upsert_task(ctx: &ReducerContext, spec: TaskSpec) -> Result<(), String> {
    crate::require_admin(ctx, "upsert_task")?;
    validate_task(&spec)?;
    let key = spec.key.trim().to_string();
    let created = store_task(ctx, spec);
    log::info!("[ADMIN] task {} {}", key, if created { "created" } else { "updated" });
    Ok(())
}

#[reducer]
pub fn set_task_active(ctx: &ReducerContext, task_id: u64, active: bool) -> Result<(), String> {
    crate::require_admin(ctx, "set_task_active")?;
    let mut task = ctx.db.task().id().find(&task_id).ok_or(GameError::NotFound("task"))?;
    task.is_active = active;
    log::info!("[ADMIN] task {} active={}", task.key, active);
    ctx.db.task().id().update(task);
    Ok(())
}

/// Create a booster window. Clients see it through the public special_event table.
#[reducer]
pub fn create_special_event(ctx: &ReducerContext, spec: EventSpec) -> Result<(), String> {
    crate::require_admin(ctx, "create_special_event")?;
    validate_event(&spec)?;

    let key = spec.key.trim().to_string();
    if ctx.db.special_event().key().find(&key).is_some() {
        return Err(GameError::DuplicateKey("special_event.key").into());
    }

    let event = ctx.db.special_event().insert(SpecialEvent {
        id: 0, // auto_inc
        key,
        title: spec.title.trim().to_string(),
        description: spec.description,
        multiplier: spec.multiplier,
        starts_at: spec.starts_at,
        ends_at: spec.ends_at,
        is_active: spec.is_active,
    });

    log::info!("[BOOSTER] created {} x{} active:{}", event.key, event.multiplier, event.is_active);
    Ok(())
}

#[reducer]
pub fn set_special_event_active(ctx: &ReducerContext, event_id: u64, active: bool) -> Result<(), String> {
    crate::require_admin(ctx, "set_special_event_active")?;
    let mut event = ctx.db.special_event()
        .id()
        .find(&event_id)
        .ok_or(GameError::NotFound("special_event"))?;
    event.is_active = active;
    log::info!("[BOOSTER] {} active={}", event.key, active);
    ctx.db.special_event().id().update(event);
    Ok(())
}

/// Set (or replace) today's cipher word
#[reducer]
pub fn set_daily_cipher(ctx: &ReducerContext, word: String) -> Result<(), String> {
    crate::require_admin(ctx, "set_daily_cipher")?;
    let word = non_empty("word", &word)?.to_ascii_uppercase();
    let day = economy::utc_day_bucket(ctx.timestamp);

    let row = DailyCipher { day: day.clone(), word, set_at: ctx.timestamp };
    if ctx.db.daily_cipher().day().find(&day).is_some() {
        ctx.db.daily_cipher().day().update(row);
    } else {
        ctx.db.daily_cipher().insert(row);
    }

    log::info!("[CIPHER] word set for {}", day);
    Ok(())
}

/// Freeze every player's balance into an airdrop batch
#[reducer]
pub fn take_airdrop_snapshot(ctx: &ReducerContext, batch_label: String) -> Result<(), String> {
    crate::require_admin(ctx, "take_airdrop_snapshot")?;
    let batch = non_empty("batch_label", &batch_label)?;
    if batch == AIRDROP_CLAIM_BATCH {
        return Err(GameError::validation("batch_label", "is reserved for individual claims").into());
    }
    if ctx.db.airdrop_snapshot().batch().filter(&batch).next().is_some() {
        return Err(GameError::DuplicateKey("airdrop_snapshot.batch").into());
    }

    let users: Vec<_> = ctx.db.user_account().iter().collect();
    let mut count = 0u32;
    let mut total_points = 0u64;
    for mut user in users {
        crate::sync_and_store(ctx, &mut user);
        if user.points == 0 {
            continue;
        }
        ctx.db.airdrop_snapshot().insert(AirdropSnapshot {
            id: 0, // auto_inc
            user_id: user.id,
            points: user.points,
            token_amount: economy::token_amount(user.points),
            wallet_address: user.wallet_address.clone(),
            batch: batch.clone(),
            created_at: ctx.timestamp,
        });
        count += 1;
        total_points = total_points.saturating_add(user.points);
    }

    log::info!("[AIRDROP] batch {} snapshotted {} users, {} points", batch, count, total_points);
    Ok(())
}

#[reducer]
pub fn set_user_role(ctx: &ReducerContext, user_id: u64, role: String) -> Result<(), String> {
    crate::require_admin(ctx, "set_user_role")?;
    let role = parse_role(&role)?;
    let mut user = ctx.db.user_account().id().find(&user_id).ok_or(GameError::NotFound("user"))?;
    user.role = role;
    user.updated_at = ctx.timestamp;
    ctx.db.user_account().id().update(user);
    log::info!("[ADMIN] user {} role set to {:?}", user_id, role);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::tests::ts;

    fn event(multiplier: f64, starts: i64, ends: i64) -> EventSpec {
        EventSpec {
            key: "double_weekend".into(),
            title: "Double weekend".into(),
            description: String::new(),
            multiplier,
            starts_at: ts(starts),
            ends_at: ts(ends),
            is_active: true,
        }
    }

    fn upgrade_spec() -> UpgradeSpec {
        UpgradeSpec {
            key: "multitap".into(),
            name: "Multitap".into(),
            description: "More points per tap".into(),
            base_cost: 100,
            max_level: 10,
            difficulty: 1.32,
            unlock_level: 0,
            stars_price: None,
            pph_boost: 0,
            tap_boost: 1,
            energy_boost: 0,
            auto_tap_boost: 0,
            is_listed: true,
        }
    }

    #[test]
    fn test_event_window_must_end_after_start() {
        assert_eq!(validate_event(&event(2.0, 100, 100)), Err(GameError::InvalidEventWindow));
        assert_eq!(validate_event(&event(2.0, 200, 100)), Err(GameError::InvalidEventWindow));
        assert_eq!(validate_event(&event(2.0, 100, 101)), Ok(()));
    }

    #[test]
    fn test_event_multiplier_bounds() {
        assert!(validate_event(&event(1.0, 0, 10)).is_ok());
        assert!(validate_event(&event(10.0, 0, 10)).is_ok());
        assert!(validate_event(&event(0.5, 0, 10)).is_err());
        assert!(validate_event(&event(10.5, 0, 10)).is_err());
        assert!(validate_event(&event(f64::NAN, 0, 10)).is_err());
    }

    #[test]
    fn test_upgrade_validation() {
        assert!(validate_upgrade(&upgrade_spec()).is_ok());

        let mut spec = upgrade_spec();
        spec.max_level = 0;
        assert!(validate_upgrade(&spec).is_err());

        let mut spec = upgrade_spec();
        spec.key = "  ".into();
        assert!(validate_upgrade(&spec).is_err());

        let mut spec = upgrade_spec();
        spec.stars_price = Some(0);
        assert!(validate_upgrade(&spec).is_err());
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("admin"), Ok(Role::Admin));
        assert_eq!(parse_role(" USER "), Ok(Role::User));
        assert!(parse_role("root").is_err());
    }
}
