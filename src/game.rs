// Player economy reducers: sync, tap, upgrade purchase, airdrop claim

use spacetimedb::{reducer, ReducerContext, Table};

use crate::config::*;
use crate::errors::GameError;
use crate::{economy, leaderboard};
use crate::{airdrop_snapshot, special_event, tap_event, upgrade, user_account};
use crate::{AirdropSnapshot, TapEvent};

/// Recompute energy and passive income (the "me" read path)
/// Clients call this before reading my_user / my_upgrades
#[reducer]
pub fn sync_me(ctx: &ReducerContext) -> Result<(), String> {
    crate::load_synced_user(ctx)?;
    Ok(())
}

/// Process one batch of taps
#[reducer]
pub fn tap(ctx: &ReducerContext, taps: u32) -> Result<(), String> {
    if !(MIN_TAPS_PER_REQUEST..=MAX_TAPS_PER_REQUEST).contains(&taps) {
        return Err(GameError::validation(
            "taps",
            format!("must be between {} and {}", MIN_TAPS_PER_REQUEST, MAX_TAPS_PER_REQUEST),
        ).into());
    }

    let mut user = crate::load_synced_user(ctx)?;

    let events: Vec<_> = ctx.db.special_event().iter().collect();
    let event_multiplier = economy::strongest_event_multiplier(&events, ctx.timestamp);

    let outcome = match economy::resolve_tap(&user, taps, event_multiplier, ctx.timestamp) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::debug!("[TAP] rejected user:{} requested:{} reason:{}", user.id, taps, e);
            return Err(e.into());
        }
    };

    economy::apply_tap(&mut user, &outcome, ctx.timestamp);
    ctx.db.user_account().id().update(user.clone());

    ctx.db.tap_event().insert(TapEvent {
        id: 0, // auto_inc
        user_id: user.id,
        taps: outcome.real_taps,
        points_earned: outcome.points_earned,
        combo_multiplier: outcome.combo_multiplier,
        event_multiplier: outcome.event_multiplier,
        created_at: ctx.timestamp,
    });

    // Shared board refresh runs in its own transaction; nothing here depends on it
    leaderboard::schedule_broadcast(ctx);

    log::info!("[TAP] user:{} taps:{}/{} earned:{} combo:{}x{:.2} event:x{} energy:{} points:{}",
        user.id, outcome.real_taps, taps, outcome.points_earned, outcome.combo_count,
        outcome.combo_multiplier, outcome.event_multiplier, user.energy, user.points);
    Ok(())
}

/// Buy the next level of an upgrade with points
#[reducer]
pub fn buy_upgrade(ctx: &ReducerContext, upgrade_id: u64) -> Result<(), String> {
    let upgrade = ctx.db.upgrade()
        .id()
        .find(&upgrade_id)
        .filter(|u| u.is_listed)
        .ok_or(GameError::NotFound("upgrade"))?;

    let mut user = crate::load_synced_user(ctx)?;
    let current_level = crate::current_upgrade_level(ctx, user.id, upgrade.id);

    // All checks before any mutation
    let cost = economy::check_purchase(&user, &upgrade, current_level)?;

    economy::apply_purchase(&mut user, &upgrade, cost);
    user.updated_at = ctx.timestamp;
    ctx.db.user_account().id().update(user.clone());

    let new_level = crate::increment_upgrade_level(ctx, user.id, upgrade.id);

    log::info!("[UPGRADE] user:{} upgrade:{} level:{}->{} cost:{} points:{} pph:{} tap:{} max_energy:{}",
        user.id, upgrade.key, current_level, new_level, cost, user.points,
        user.pph, user.tap_power, user.max_energy);
    Ok(())
}

/// Claim the airdrop: records the wallet and freezes the balance in a snapshot
#[reducer]
pub fn claim_airdrop(ctx: &ReducerContext, wallet_address: String) -> Result<(), String> {
    let wallet = validate_wallet_address(&wallet_address)?;
    let mut user = crate::load_synced_user(ctx)?;

    let token_amount = economy::airdrop_tokens(user.points)?;

    user.wallet_address = Some(wallet.clone());
    user.updated_at = ctx.timestamp;
    ctx.db.user_account().id().update(user.clone());

    ctx.db.airdrop_snapshot().insert(AirdropSnapshot {
        id: 0, // auto_inc
        user_id: user.id,
        points: user.points,
        token_amount,
        wallet_address: Some(wallet),
        batch: AIRDROP_CLAIM_BATCH.to_string(),
        created_at: ctx.timestamp,
    });

    log::info!("[AIRDROP] claim user:{} points:{} tokens:{}", user.id, user.points, token_amount);
    Ok(())
}

/// TON wallet address: user-friendly base64url (48 chars) or raw "wc:hex64"
pub fn validate_wallet_address(raw: &str) -> Result<String, GameError> {
    let address = raw.trim();
    let friendly = address.len() == 48
        && address.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '+' || c == '/');
    let raw_form = match address.split_once(':') {
        Some((wc, hex)) => {
            wc.parse::<i32>().is_ok() && hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    };

    if friendly || raw_form {
        Ok(address.to_string())
    } else {
        Err(GameError::validation("wallet_address", "is not a valid TON address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_address_forms() {
        let friendly = "EQDtFpEwcFAEcRe5mLVh2N6C0x-_hJEM7W61_JLnSF74p4q2";
        assert_eq!(friendly.len(), 48);
        assert_eq!(validate_wallet_address(&format!("  {} ", friendly)), Ok(friendly.to_string()));

        let raw = format!("0:{}", "ab".repeat(32));
        assert!(validate_wallet_address(&raw).is_ok());
        assert!(validate_wallet_address(&format!("-1:{}", "0F".repeat(32))).is_ok());

        assert!(validate_wallet_address("").is_err());
        assert!(validate_wallet_address("not-a-wallet").is_err());
        assert!(validate_wallet_address(&format!("x:{}", "ab".repeat(32))).is_err());
    }

    #[test]
    fn test_airdrop_threshold_boundary() {
        assert_eq!(
            economy::airdrop_tokens(9_999),
            Err(GameError::AirdropThreshold { required: AIRDROP_MIN_POINTS, balance: 9_999 })
        );
        assert_eq!(economy::airdrop_tokens(10_000), Ok(10.0));
    }
}
