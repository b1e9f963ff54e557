// Task claims (daily, social, cipher, special)

use spacetimedb::{reducer, ReducerContext, Table, Timestamp};

use crate::errors::GameError;
use crate::{daily_cipher, economy, task, user_account, user_task};
use crate::{Task, TaskType, UserTask};

/// Uniqueness key for a claim: one per UTC day for daily tasks, one ever otherwise
pub fn claim_key(user_id: u64, task: &Task, now: Timestamp) -> String {
    let bucket = if task.is_daily {
        economy::utc_day_bucket(now)
    } else {
        "once".to_string()
    };
    format!("{}:{}:{}", user_id, task.id, bucket)
}

pub fn cipher_matches(expected: &str, given: &str) -> bool {
    let given = given.trim();
    !given.is_empty() && expected.trim().eq_ignore_ascii_case(given)
}

/// Claim a task reward
/// Cipher tasks need today's word; claim uniqueness is enforced by the claim_key constraint
#[reducer]
pub fn claim_task(ctx: &ReducerContext, task_id: u64, cipher: Option<String>) -> Result<(), String> {
    let task = ctx.db.task()
        .id()
        .find(&task_id)
        .ok_or(GameError::NotFound("task"))?;
    if !task.is_active {
        return Err(GameError::TaskInactive.into());
    }

    let mut user = crate::load_synced_user(ctx)?;

    let key = claim_key(user.id, &task, ctx.timestamp);
    if ctx.db.user_task().claim_key().find(&key).is_some() {
        return Err(GameError::AlreadyClaimed.into());
    }

    if task.task_type == TaskType::Cipher {
        let today = economy::utc_day_bucket(ctx.timestamp);
        let expected = ctx.db.daily_cipher().day().find(&today).map(|c| c.word);
        let valid = match (expected, cipher.as_deref()) {
            (Some(word), Some(given)) => cipher_matches(&word, given),
            _ => false,
        };
        if !valid {
            log::info!("[TASK] wrong cipher user:{} task:{}", user.id, task.key);
            return Err(GameError::InvalidCipher.into());
        }
    }

    ctx.db.user_task()
        .try_insert(UserTask {
            id: 0, // auto_inc
            claim_key: key,
            user_id: user.id,
            task_id: task.id,
            reward: task.reward,
            claimed_at: ctx.timestamp,
        })
        .map_err(|_| GameError::AlreadyClaimed)?;

    user.points = user.points.saturating_add(task.reward);
    user.updated_at = ctx.timestamp;
    ctx.db.user_account().id().update(user.clone());

    log::info!("[TASK] claimed user:{} task:{} type:{:?} reward:{} points:{}",
        user.id, task.key, task.task_type, task.reward, user.points);
    Ok(())
}
