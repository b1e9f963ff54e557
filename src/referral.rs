// Referral codes and the one-time signup bonus pair

use spacetimedb::{ReducerContext, Table};

use crate::config::*;
use crate::{referral_summary, user_account};
use crate::{ReferralSummary, User};

// Avoid confusing letters (no I, O, 0, 1)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn random_tail(ctx: &ReducerContext, len: usize) -> String {
    use spacetimedb::rand::Rng;
    let mut rng = ctx.rng();
    (0..len)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// PREFIX + last digits of the telegram id + random tail
pub fn code_candidate(telegram_id: &str, tail: &str) -> String {
    let digits: String = telegram_id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let start = digits.len().saturating_sub(REFERRAL_ID_SUFFIX_LEN);
    format!("{}{}{}", REFERRAL_CODE_PREFIX, &digits[start..], tail.to_ascii_uppercase())
}

/// Pick a free code with a bounded number of short-tail attempts,
/// then one long-tail candidate whose collision odds are negligible.
pub fn pick_code(
    telegram_id: &str,
    mut tail: impl FnMut(usize) -> String,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let candidate = code_candidate(telegram_id, &tail(REFERRAL_RANDOM_LEN));
        if !is_taken(&candidate) {
            return candidate;
        }
    }
    log::warn!("[REFERRAL] {} short codes taken for tg:{}, using long tail",
        REFERRAL_CODE_ATTEMPTS, crate::short_id(telegram_id));
    code_candidate(telegram_id, &tail(REFERRAL_FALLBACK_RANDOM_LEN))
}

pub fn generate_referral_code(ctx: &ReducerContext, telegram_id: &str) -> String {
    pick_code(
        telegram_id,
        |len| random_tail(ctx, len),
        |code| ctx.db.user_account().referral_code().find(&code.to_string()).is_some(),
    )
}

/// Look up the inviting user; unknown or blank codes are ignored
pub fn resolve_referrer(ctx: &ReducerContext, code: Option<&str>) -> Option<User> {
    let code = code.map(str::trim).filter(|c| !c.is_empty())?;
    let referrer = ctx.db.user_account().referral_code().find(&code.to_ascii_uppercase());
    if referrer.is_none() {
        log::info!("[REFERRAL] unknown code {} ignored", code);
    }
    referrer
}

/// Link a new user to their referrer and credit both halves of the bonus pair.
/// Returns false (and changes nothing) when the new user is already linked or is the referrer.
pub fn apply_signup_bonus(new_user: &mut User, referrer: &mut User) -> bool {
    if new_user.referred_by_id.is_some() || new_user.telegram_id == referrer.telegram_id {
        return false;
    }
    new_user.referred_by_id = Some(referrer.id);
    new_user.points = new_user.points.saturating_add(REFERRED_BONUS);
    referrer.points = referrer.points.saturating_add(REFERRER_BONUS);
    true
}

/// Persist the credited referrer and bump their counters.
/// Runs in the signup transaction, after apply_signup_bonus.
pub fn record_referral(ctx: &ReducerContext, mut referrer: User, new_user_id: u64) {
    referrer.updated_at = ctx.timestamp;
    let referrer_id = referrer.id;
    ctx.db.user_account().id().update(referrer);

    match ctx.db.referral_summary().user_id().find(&referrer_id) {
        Some(mut summary) => {
            summary.invited_count += 1;
            summary.bonus_earned = summary.bonus_earned.saturating_add(REFERRER_BONUS);
            ctx.db.referral_summary().user_id().update(summary);
        }
        None => {
            ctx.db.referral_summary().insert(ReferralSummary {
                user_id: referrer_id,
                invited_count: 1,
                bonus_earned: REFERRER_BONUS,
            });
        }
    }

    log::info!("[REFERRAL] bonus referrer:{} +{} new_user:{} +{}",
        referrer_id, REFERRER_BONUS, new_user_id, REFERRED_BONUS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_code_shape() {
        assert_eq!(code_candidate("123456789", "ab2c"), "TAP456789AB2C");
        assert_eq!(code_candidate("42", "WXYZ"), "TAP42WXYZ");
    }

    #[test]
    fn test_pick_code_retries_until_free() {
        let calls = Cell::new(0);
        let code = pick_code(
            "555000111",
            |len| {
                calls.set(calls.get() + 1);
                format!("{:0>width$}", calls.get(), width = len)
            },
            |c| c.ends_with("0001") || c.ends_with("0002"),
        );
        assert_eq!(code, "TAP0001110003");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_signup_bonus_credits_both_sides_once() {
        let mut referrer = crate::economy::tests::test_user();
        referrer.id = 5;
        referrer.telegram_id = "555".into();
        referrer.points = 40;

        let mut newcomer = crate::economy::tests::test_user();
        newcomer.id = 0;
        newcomer.telegram_id = "777".into();

        assert!(apply_signup_bonus(&mut newcomer, &mut referrer));
        assert_eq!(newcomer.referred_by_id, Some(5));
        assert_eq!(newcomer.points, REFERRED_BONUS);
        assert_eq!(referrer.points, 40 + REFERRER_BONUS);

        // A second application is refused and credits nothing
        assert!(!apply_signup_bonus(&mut newcomer, &mut referrer));
        assert_eq!(newcomer.points, REFERRED_BONUS);
        assert_eq!(referrer.points, 40 + REFERRER_BONUS);
    }

    #[test]
    fn test_signup_bonus_refuses_self_referral() {
        let mut me = crate::economy::tests::test_user();
        let mut same = me.clone();
        assert!(!apply_signup_bonus(&mut me, &mut same));
        assert_eq!(me.points, 0);
        assert_eq!(me.referred_by_id, None);
    }

    #[test]
    fn test_pick_code_is_bounded() {
        let calls = Cell::new(0);
        let code = pick_code(
            "777",
            |len| {
                calls.set(calls.get() + 1);
                "Q".repeat(len)
            },
            |_| true,
        );
        assert_eq!(calls.get(), REFERRAL_CODE_ATTEMPTS + 1);
        assert_eq!(code, format!("TAP777{}", "Q".repeat(REFERRAL_FALLBACK_RANDOM_LEN)));
    }
}
