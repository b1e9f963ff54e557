// Pure numeric policy for the tap economy.
//
// Nothing here touches the database: reducers load rows, call these functions,
// and write the result back inside one transaction. All point math floors,
// never rounds, so fractional credit is never granted.

use spacetimedb::Timestamp;

use crate::config::*;
use crate::errors::GameError;
use crate::{SpecialEvent, Upgrade, User};

const MICROS_PER_MS: i64 = 1_000;
const MICROS_PER_SEC: i64 = 1_000_000;
const MICROS_PER_MIN: i64 = 60 * MICROS_PER_SEC;

/// Whole units elapsed between two timestamps, floored at 0 (clock skew never goes negative)
fn elapsed_units(since: Timestamp, now: Timestamp, unit_micros: i64) -> u64 {
    let delta = now.to_micros_since_unix_epoch() - since.to_micros_since_unix_epoch();
    if delta <= 0 {
        0
    } else {
        (delta / unit_micros) as u64
    }
}

// -------------------- Time sync --------------------

/// new energy = min(max_energy, energy + minutes × regen rate)
pub fn regenerate_energy(energy: u32, max_energy: u32, elapsed_minutes: u64) -> u32 {
    let regen = elapsed_minutes.saturating_mul(ENERGY_REGEN_PER_MINUTE);
    (energy as u64).saturating_add(regen).min(max_energy as u64) as u32
}

/// floor(pph / 3600 × seconds), computed in integers so no float error creeps in
pub fn passive_gain(pph: u64, elapsed_secs: u64) -> u64 {
    ((pph as u128 * elapsed_secs as u128) / 3600) as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOutcome {
    pub passive_gain: u64,
    pub energy_gained: u32,
    pub changed: bool,
}

/// Advance energy and passive income to `now`.
///
/// When either moved, both timestamps reset to `now` and the caller must persist
/// the row. Otherwise the row is untouched. Elapsed time is not capped: a user
/// away for a month gets the full passive credit on return, energy stops at the
/// ceiling.
pub fn time_sync(user: &mut User, now: Timestamp) -> SyncOutcome {
    let minutes = elapsed_units(user.last_energy_refill, now, MICROS_PER_MIN);
    let new_energy = regenerate_energy(user.energy, user.max_energy, minutes);

    let seconds = elapsed_units(user.last_profit_at, now, MICROS_PER_SEC);
    let gain = passive_gain(user.pph, seconds);

    let energy_changed = new_energy != user.energy;
    if !energy_changed && gain == 0 {
        return SyncOutcome { passive_gain: 0, energy_gained: 0, changed: false };
    }

    let energy_gained = new_energy.saturating_sub(user.energy);
    user.energy = new_energy;
    user.points = user.points.saturating_add(gain);
    user.last_energy_refill = now;
    user.last_profit_at = now;
    user.updated_at = now;

    SyncOutcome { passive_gain: gain, energy_gained, changed: true }
}

// -------------------- Combo --------------------

/// multiplier = min(3.5, 1 + count × 0.03)
pub fn combo_multiplier_for(count: u32) -> f64 {
    (1.0 + count as f64 * COMBO_STEP).min(COMBO_MAX_MULTIPLIER)
}

/// Next (count, multiplier) for a tap batch arriving at `now`
/// A pause longer than the combo window (or no previous tap) restarts the streak at 1
pub fn advance_combo(last_tap_at: Option<Timestamp>, combo_count: u32, now: Timestamp) -> (u32, f64) {
    let within_window = last_tap_at
        .map(|last| {
            let gap_micros = now.to_micros_since_unix_epoch() - last.to_micros_since_unix_epoch();
            gap_micros <= COMBO_WINDOW_MS * MICROS_PER_MS
        })
        .unwrap_or(false);

    if !within_window {
        return (1, 1.0);
    }
    let count = combo_count.saturating_add(1).min(COMBO_MAX_COUNT);
    (count, combo_multiplier_for(count))
}

// -------------------- Special events --------------------

/// Active = flagged on AND now within [starts_at, ends_at]
pub fn is_event_active(event: &SpecialEvent, now: Timestamp) -> bool {
    event.is_active && event.starts_at <= now && now <= event.ends_at
}

/// Highest multiplier among currently active events, 1.0 when none
pub fn strongest_event_multiplier<'a, I>(events: I, now: Timestamp) -> f64
where
    I: IntoIterator<Item = &'a SpecialEvent>,
{
    events.into_iter()
        .filter(|e| is_event_active(e, now))
        .map(|e| e.multiplier)
        .fold(1.0, f64::max)
}

// -------------------- Taps --------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapOutcome {
    pub real_taps: u32,
    pub points_earned: u64,
    pub combo_count: u32,
    pub combo_multiplier: f64,
    pub event_multiplier: f64,
}

/// Work out a tap batch against an already time-synced user
/// Fails with EnergyDepleted (and changes nothing) when the tank is empty
pub fn resolve_tap(user: &User, requested: u32, event_multiplier: f64, now: Timestamp) -> Result<TapOutcome, GameError> {
    if user.energy == 0 {
        return Err(GameError::EnergyDepleted);
    }
    let real_taps = requested.min(user.energy);
    let (combo_count, combo_multiplier) = advance_combo(user.last_tap_at, user.combo_count, now);

    let points_per_tap = user.tap_power as f64 * combo_multiplier * event_multiplier;
    let points_earned = (points_per_tap * real_taps as f64).floor() as u64;

    Ok(TapOutcome { real_taps, points_earned, combo_count, combo_multiplier, event_multiplier })
}

pub fn apply_tap(user: &mut User, outcome: &TapOutcome, now: Timestamp) {
    user.points = user.points.saturating_add(outcome.points_earned);
    user.energy -= outcome.real_taps;
    user.total_taps = user.total_taps.saturating_add(outcome.real_taps as u64);
    user.combo_count = outcome.combo_count;
    user.combo_multiplier = outcome.combo_multiplier;
    user.last_tap_at = Some(now);
    user.updated_at = now;
}

// -------------------- Upgrades --------------------

/// cost = floor(base_cost × (current_level + 1)^1.32)
pub fn upgrade_cost(base_cost: u64, current_level: u32) -> u64 {
    (base_cost as f64 * ((current_level + 1) as f64).powf(UPGRADE_COST_EXPONENT)).floor() as u64
}

/// Cost of the next level, None when maxed
pub fn next_upgrade_cost(upgrade: &Upgrade, current_level: u32) -> Option<u64> {
    if current_level >= upgrade.max_level {
        None
    } else {
        Some(upgrade_cost(upgrade.base_cost, current_level))
    }
}

pub fn upgrade_pair_key(user_id: u64, upgrade_id: u64) -> String {
    format!("{}:{}", user_id, upgrade_id)
}

/// Level and affordability checks for a points purchase; returns the cost
pub fn check_purchase(user: &User, upgrade: &Upgrade, current_level: u32) -> Result<u64, GameError> {
    let cost = next_upgrade_cost(upgrade, current_level)
        .ok_or(GameError::MaxLevelReached { max_level: upgrade.max_level })?;
    if user.points < cost {
        return Err(GameError::InsufficientPoints { cost, balance: user.points });
    }
    Ok(cost)
}

/// Points purchase effect: debit the checked cost, then apply the level's boosts
pub fn apply_purchase(user: &mut User, upgrade: &Upgrade, cost: u64) {
    user.points -= cost;
    apply_upgrade_boosts(user, upgrade, false);
}

/// Permanent stat deltas from one upgrade level.
/// Energy capacity and current energy rise together, so a purchase also tops up.
/// Auto-tap boosts only come with Stars purchases.
pub fn apply_upgrade_boosts(user: &mut User, upgrade: &Upgrade, include_auto_tap: bool) {
    user.pph = user.pph.saturating_add(upgrade.pph_boost);
    user.tap_power = user.tap_power.saturating_add(upgrade.tap_boost);
    user.max_energy = user.max_energy.saturating_add(upgrade.energy_boost);
    user.energy = user.energy.saturating_add(upgrade.energy_boost).min(user.max_energy);
    if include_auto_tap {
        user.auto_tap_per_hour = user.auto_tap_per_hour.saturating_add(upgrade.auto_tap_boost);
    }
}

// -------------------- Conversions --------------------

/// Off-chain token estimate at 1000 points per token
pub fn token_amount(points: u64) -> f64 {
    points as f64 / POINTS_PER_TOKEN as f64
}

/// Token amount for an airdrop claim, refusing balances under the minimum
pub fn airdrop_tokens(points: u64) -> Result<f64, GameError> {
    if points < AIRDROP_MIN_POINTS {
        return Err(GameError::AirdropThreshold { required: AIRDROP_MIN_POINTS, balance: points });
    }
    Ok(token_amount(points))
}

/// Stars needed to buy a points pack (at least one star)
pub fn stars_for_points(points: u64) -> u32 {
    points.div_ceil(POINTS_PER_STAR).max(1).min(u32::MAX as u64) as u32
}

/// UTC calendar day bucket, e.g. "20261018"
pub fn utc_day_bucket(now: Timestamp) -> String {
    chrono::DateTime::from_timestamp_micros(now.to_micros_since_unix_epoch())
        .map(|dt| dt.date_naive().format("%Y%m%d").to_string())
        .unwrap_or_else(|| "19700101".to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Role;

    pub(crate) fn ts(secs: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(secs * 1_000_000)
    }

    fn ts_ms(ms: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(ms * 1_000)
    }

    pub(crate) fn test_user() -> User {
        User {
            id: 1,
            telegram_id: "100200300".into(),
            username: None,
            first_name: None,
            last_name: None,
            language: "en".into(),
            role: Role::User,
            points: 0,
            energy: 100,
            max_energy: 100,
            tap_power: 1,
            combo_count: 0,
            combo_multiplier: 1.0,
            pph: 0,
            auto_tap_per_hour: 0,
            stars_spent: 0,
            total_taps: 0,
            wallet_address: None,
            referral_code: "TAP200300ABCD".into(),
            referred_by_id: None,
            last_tap_at: None,
            last_energy_refill: ts(1_000),
            last_profit_at: ts(1_000),
            created_at: ts(1_000),
            updated_at: ts(1_000),
        }
    }

    pub(crate) fn test_upgrade(base_cost: u64, max_level: u32) -> Upgrade {
        Upgrade {
            id: 7,
            key: "turbo".into(),
            name: "Turbo".into(),
            description: String::new(),
            base_cost,
            max_level,
            difficulty: 1.5,
            unlock_level: 0,
            stars_price: Some(50),
            pph_boost: 100,
            tap_boost: 1,
            energy_boost: 50,
            auto_tap_boost: 360,
            is_listed: true,
        }
    }

    fn event(multiplier: f64, starts: i64, ends: i64, active: bool) -> SpecialEvent {
        SpecialEvent {
            id: 1,
            key: format!("x{}", multiplier),
            title: String::new(),
            description: String::new(),
            multiplier,
            starts_at: ts(starts),
            ends_at: ts(ends),
            is_active: active,
        }
    }

    #[test]
    fn test_energy_regen_caps_and_is_monotonic() {
        let mut previous = 0;
        for minutes in 0..40 {
            let e = regenerate_energy(5, 300, minutes);
            assert!(e >= previous);
            assert!(e <= 300);
            assert_eq!(e as u64, (5 + 10 * minutes).min(300));
            previous = e;
        }
        assert_eq!(regenerate_energy(0, 100, u64::MAX), 100);
    }

    #[test]
    fn test_passive_gain_floors() {
        assert_eq!(passive_gain(0, 1_000_000), 0);
        assert_eq!(passive_gain(3600, 1), 1);
        assert_eq!(passive_gain(1800, 1), 0);
        assert_eq!(passive_gain(1800, 3), 1);
        assert_eq!(passive_gain(100, 3600), 100);
    }

    #[test]
    fn test_time_sync_credits_and_resets_timestamps() {
        let mut user = test_user();
        user.energy = 20;
        user.pph = 3600;
        // 2.5 minutes later: 2 whole minutes of regen, 150 seconds of profit
        let now = ts(1_150);
        let out = time_sync(&mut user, now);
        assert!(out.changed);
        assert_eq!(user.energy, 40);
        assert_eq!(out.passive_gain, 150);
        assert_eq!(user.points, 150);
        assert_eq!(user.last_energy_refill, now);
        assert_eq!(user.last_profit_at, now);
    }

    #[test]
    fn test_time_sync_is_noop_when_nothing_moves() {
        let mut user = test_user(); // full energy, no pph
        let before = user.clone();
        let out = time_sync(&mut user, ts(1_000_000));
        assert!(!out.changed);
        assert_eq!(user.points, before.points);
        assert_eq!(user.last_energy_refill, before.last_energy_refill);
    }

    #[test]
    fn test_time_sync_ignores_clock_going_backwards() {
        let mut user = test_user();
        user.energy = 0;
        user.pph = 1000;
        let out = time_sync(&mut user, ts(500));
        assert!(!out.changed);
        assert_eq!(user.energy, 0);
    }

    #[test]
    fn test_combo_builds_within_window_and_resets_after_pause() {
        let t0 = ts_ms(10_000);
        assert_eq!(advance_combo(None, 50, t0), (1, 1.0));

        let (count, mult) = advance_combo(Some(t0), 1, ts_ms(12_000));
        assert_eq!(count, 2);
        assert!((mult - 1.06).abs() < 1e-9);
        assert!(mult > 1.0);

        assert_eq!(advance_combo(Some(t0), 40, ts_ms(12_001)), (1, 1.0));

        // Sub-millisecond overshoot still breaks the streak
        let just_over = Timestamp::from_micros_since_unix_epoch(12_000_500);
        assert_eq!(advance_combo(Some(t0), 40, just_over), (1, 1.0));
        let exactly = Timestamp::from_micros_since_unix_epoch(12_000_000);
        assert_eq!(advance_combo(Some(t0), 40, exactly).0, 41);
    }

    #[test]
    fn test_combo_caps() {
        let t0 = ts_ms(10_000);
        let (count, mult) = advance_combo(Some(t0), COMBO_MAX_COUNT, ts_ms(10_500));
        assert_eq!(count, COMBO_MAX_COUNT);
        assert_eq!(mult, COMBO_MAX_MULTIPLIER);
        assert_eq!(combo_multiplier_for(0), 1.0);
        assert_eq!(combo_multiplier_for(84), 3.5);
    }

    #[test]
    fn test_tap_with_low_energy_scenario() {
        let mut user = test_user();
        user.energy = 5;
        user.tap_power = 2;
        let now = ts(2_000);

        let outcome = resolve_tap(&user, 10, 1.0, now).unwrap();
        assert_eq!(outcome.real_taps, 5);
        assert_eq!(outcome.points_earned, 10);

        apply_tap(&mut user, &outcome, now);
        assert_eq!(user.energy, 0);
        assert_eq!(user.points, 10);
        assert_eq!(user.total_taps, 5);
        assert_eq!(user.last_tap_at, Some(now));
    }

    #[test]
    fn test_tap_keeps_regen_measured_from_last_refill() {
        let mut user = test_user(); // full since ts(1_000), never synced
        let now = ts(10_000);
        let outcome = resolve_tap(&user, 30, 1.0, now).unwrap();
        apply_tap(&mut user, &outcome, now);
        assert_eq!(user.energy, 70);
        assert_eq!(user.last_energy_refill, ts(1_000));

        // Regen counts whole minutes since the last refill, capped at the tank size
        let out = time_sync(&mut user, ts(10_120));
        assert!(out.changed);
        assert_eq!(user.energy, 100);
        assert_eq!(user.last_energy_refill, ts(10_120));
    }

    #[test]
    fn test_tap_fails_when_energy_empty() {
        let mut user = test_user();
        user.energy = 0;
        assert_eq!(resolve_tap(&user, 1, 1.0, ts(2_000)), Err(GameError::EnergyDepleted));
    }

    #[test]
    fn test_tap_applies_combo_and_event_and_floors() {
        let mut user = test_user();
        user.tap_power = 3;
        user.combo_count = 1;
        user.last_tap_at = Some(ts_ms(1_999_000));
        // count 2 -> 1.06; 3 × 1.06 × 2.0 × 7 = 44.52
        let outcome = resolve_tap(&user, 7, 2.0, ts_ms(2_000_000)).unwrap();
        assert_eq!(outcome.combo_count, 2);
        assert_eq!(outcome.points_earned, 44);
    }

    #[test]
    fn test_strongest_event_wins() {
        let events = vec![
            event(2.0, 0, 100, true),
            event(5.0, 0, 100, true),
            event(9.0, 0, 100, false),
            event(8.0, 200, 300, true),
        ];
        assert_eq!(strongest_event_multiplier(&events, ts(50)), 5.0);
        assert_eq!(strongest_event_multiplier(&events, ts(250)), 8.0);
        assert_eq!(strongest_event_multiplier(&events, ts(150)), 1.0);
        assert_eq!(strongest_event_multiplier(&Vec::new(), ts(50)), 1.0);
        // window bounds are inclusive
        assert!(is_event_active(&events[0], ts(0)));
        assert!(is_event_active(&events[0], ts(100)));
    }

    #[test]
    fn test_upgrade_cost_formula() {
        assert_eq!(upgrade_cost(100, 0), 100);
        assert_eq!(upgrade_cost(100, 1), 249);
        assert_eq!(upgrade_cost(100, 4), 836);
        for level in 0..50 {
            assert!(upgrade_cost(100, level + 1) > upgrade_cost(100, level));
        }
    }

    #[test]
    fn test_purchase_checks() {
        let upgrade = test_upgrade(100, 3);
        let mut user = test_user();
        user.points = 99;
        assert_eq!(
            check_purchase(&user, &upgrade, 0),
            Err(GameError::InsufficientPoints { cost: 100, balance: 99 })
        );
        user.points = 100;
        assert_eq!(check_purchase(&user, &upgrade, 0), Ok(100));
        user.points = 1_000_000;
        assert_eq!(check_purchase(&user, &upgrade, 3), Err(GameError::MaxLevelReached { max_level: 3 }));
        assert_eq!(next_upgrade_cost(&upgrade, 3), None);
    }

    #[test]
    fn test_purchase_debits_exact_cost() {
        let upgrade = test_upgrade(100, 3);
        let mut user = test_user();
        user.points = 1_000;
        let level = 1;
        let cost = check_purchase(&user, &upgrade, level).unwrap();
        assert_eq!(cost, 249);

        apply_purchase(&mut user, &upgrade, cost);
        assert_eq!(user.points, 1_000 - 249);
        assert_eq!(user.pph, 100);
        assert_eq!(user.tap_power, 2);
        assert_eq!(user.max_energy, 150);
        assert_eq!(user.auto_tap_per_hour, 0);
    }

    #[test]
    fn test_upgrade_boosts_top_up_energy() {
        let upgrade = test_upgrade(100, 3);
        let mut user = test_user();
        user.energy = 30;
        apply_upgrade_boosts(&mut user, &upgrade, false);
        assert_eq!(user.max_energy, 150);
        assert_eq!(user.energy, 80);
        assert_eq!(user.pph, 100);
        assert_eq!(user.tap_power, 2);
        assert_eq!(user.auto_tap_per_hour, 0);

        apply_upgrade_boosts(&mut user, &upgrade, true);
        assert_eq!(user.auto_tap_per_hour, 360);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(token_amount(10_000), 10.0);
        assert_eq!(token_amount(12_345), 12.345);
        assert_eq!(stars_for_points(1), 1);
        assert_eq!(stars_for_points(250), 1);
        assert_eq!(stars_for_points(251), 2);
        assert_eq!(stars_for_points(0), 1);
    }

    #[test]
    fn test_utc_day_bucket() {
        // 2024-03-01T23:59:59Z and one second later
        assert_eq!(utc_day_bucket(ts(1_709_337_599)), "20240301");
        assert_eq!(utc_day_bucket(ts(1_709_337_600)), "20240302");
    }
}
