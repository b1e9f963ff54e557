// Telegram Stars: invoice queue for the payment worker and idempotent
// reward application on payment confirmation.

use serde_json::{json, Value};
use spacetimedb::{reducer, ReducerContext, Table, Timestamp};

use crate::config::*;
use crate::errors::GameError;
use crate::{economy, stars_invoice, stars_purchase, upgrade, user_account};
use crate::{InvoiceStatus, InvoiceSweepSchedule, StarsInvoice, StarsPurchase, StarsRewardType, Upgrade, User};

/// What a confirmed payment buys
#[derive(Debug, Clone, PartialEq)]
pub enum StarsReward {
    Upgrade { key: String },
    Points(u64),
}

/// Accept a JSON number or a numeric string
fn json_u64(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Decode the invoice payload echoed back by Telegram. Rules, in order:
///   1. JSON {"type":"upgrade","upgradeKey":...}
///   2. JSON {"type":"points","points":...}
///   3. "upgrade:<key>"
///   4. bare number of points
///   5. anything else: total_stars × 250 points
pub fn parse_reward_payload(payload: &str, total_stars: u32) -> StarsReward {
    let trimmed = payload.trim();

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        match obj.get("type").and_then(|v| v.as_str()) {
            Some("upgrade") => {
                if let Some(key) = obj.get("upgradeKey").and_then(|v| v.as_str()).filter(|k| !k.trim().is_empty()) {
                    return StarsReward::Upgrade { key: key.trim().to_string() };
                }
            }
            Some("points") => {
                if let Some(points) = obj.get("points").and_then(json_u64) {
                    return StarsReward::Points(points);
                }
            }
            _ => {}
        }
    }

    if let Some(key) = trimmed.strip_prefix("upgrade:").map(str::trim).filter(|k| !k.is_empty()) {
        return StarsReward::Upgrade { key: key.to_string() };
    }

    if let Ok(points) = trimmed.parse::<u64>() {
        return StarsReward::Points(points);
    }

    StarsReward::Points(total_stars as u64 * POINTS_PER_STAR)
}

/// Invoice id embedded by request_stars_invoice, if the payload carries one
pub fn invoice_id_from_payload(payload: &str) -> Option<u64> {
    serde_json::from_str::<Value>(payload.trim())
        .ok()?
        .get("invoiceId")
        .and_then(json_u64)
}

pub fn invoice_payload(reward: &StarsReward, invoice_id: u64) -> String {
    let payload = match reward {
        StarsReward::Upgrade { key } => json!({
            "type": "upgrade",
            "upgradeKey": key,
            "invoiceId": invoice_id,
        }),
        StarsReward::Points(points) => json!({
            "type": "points",
            "points": points,
            "invoiceId": invoice_id,
        }),
    };
    payload.to_string()
}

/// Pending invoices the worker has not answered within the timeout
pub fn invoice_timed_out(created_at: Timestamp, now: Timestamp) -> bool {
    let waited = now.to_micros_since_unix_epoch() - created_at.to_micros_since_unix_epoch();
    waited >= INVOICE_TIMEOUT_SECS as i64 * 1_000_000
}

/// Stars upgrade path: same level cap as a points purchase, paid for externally
pub fn apply_upgrade_reward(user: &mut User, upgrade: &Upgrade, current_level: u32, total_stars: u32) -> Result<(), GameError> {
    if current_level >= upgrade.max_level {
        return Err(GameError::MaxLevelReached { max_level: upgrade.max_level });
    }
    economy::apply_upgrade_boosts(user, upgrade, true);
    user.stars_spent = user.stars_spent.saturating_add(total_stars as u64);
    Ok(())
}

pub fn apply_points_reward(user: &mut User, points: u64, total_stars: u32) {
    user.points = user.points.saturating_add(points);
    user.stars_spent = user.stars_spent.saturating_add(total_stars as u64);
}

/// Ledger lookup result for an incoming charge id
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargeDecision {
    Apply,
    AlreadyProcessed { purchase_id: u64 },
}

pub fn charge_decision(existing: Option<&StarsPurchase>) -> ChargeDecision {
    match existing {
        Some(purchase) => ChargeDecision::AlreadyProcessed { purchase_id: purchase.id },
        None => ChargeDecision::Apply,
    }
}

/// What a confirmed charge actually granted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Settlement {
    Upgrade { upgrade_id: u64 },
    Points(u64),
}

/// Settle a paid charge. The stars are already taken, so this never fails:
/// an upgrade that cannot be granted (unknown key or already maxed) is paid
/// out as total_stars × 250 points instead.
pub fn settle_reward(
    user: &mut User,
    reward: &StarsReward,
    upgrade: Option<(&Upgrade, u32)>,
    total_stars: u32,
) -> Settlement {
    if let (StarsReward::Upgrade { .. }, Some((upgrade, level))) = (reward, upgrade) {
        if apply_upgrade_reward(user, upgrade, level, total_stars).is_ok() {
            return Settlement::Upgrade { upgrade_id: upgrade.id };
        }
    }
    let points = match reward {
        StarsReward::Points(points) => *points,
        StarsReward::Upgrade { .. } => total_stars as u64 * POINTS_PER_STAR,
    };
    apply_points_reward(user, points, total_stars);
    Settlement::Points(points)
}

/// Queue an invoice for the payment worker
/// kind: "upgrade" (needs upgrade_key) or "points" (needs points)
#[reducer]
pub fn request_stars_invoice(
    ctx: &ReducerContext,
    kind: String,
    upgrade_key: Option<String>,
    points: Option<u64>,
) -> Result<(), String> {
    let user = crate::get_user(ctx)?;

    let (reward, stars_price) = match kind.trim() {
        "upgrade" => {
            let key = upgrade_key
                .filter(|k| !k.trim().is_empty())
                .ok_or(GameError::validation("upgrade_key", "is required for upgrade invoices"))?;
            let upgrade = ctx.db.upgrade()
                .key()
                .find(&key)
                .filter(|u| u.is_listed)
                .ok_or(GameError::NotFound("upgrade"))?;
            let price = upgrade.stars_price
                .filter(|p| *p > 0)
                .ok_or(GameError::validation("upgrade_key", "is not sold for stars"))?;
            let level = crate::current_upgrade_level(ctx, user.id, upgrade.id);
            if level >= upgrade.max_level {
                return Err(GameError::MaxLevelReached { max_level: upgrade.max_level }.into());
            }
            (StarsReward::Upgrade { key }, price)
        }
        "points" => {
            let points = points
                .filter(|p| *p > 0)
                .ok_or(GameError::validation("points", "must be greater than zero"))?;
            (StarsReward::Points(points), economy::stars_for_points(points))
        }
        _ => return Err(GameError::validation("kind", "must be upgrade or points").into()),
    };

    let mut invoice = ctx.db.stars_invoice().insert(StarsInvoice {
        id: 0, // auto_inc
        user_id: user.id,
        telegram_id: user.telegram_id.clone(),
        payload: String::new(),
        stars_price,
        status: InvoiceStatus::Pending,
        invoice_link: None,
        last_error: None,
        created_at: ctx.timestamp,
        resolved_at: None,
    });
    invoice.payload = invoice_payload(&reward, invoice.id);
    let invoice_id = invoice.id;
    ctx.db.stars_invoice().id().update(invoice);

    log::info!("[STARS] invoice:{} queued user:{} reward:{:?} stars:{}", invoice_id, user.id, reward, stars_price);
    Ok(())
}

/// Payment worker reports the outcome of the outbound invoice call
#[reducer]
pub fn complete_stars_invoice(
    ctx: &ReducerContext,
    invoice_id: u64,
    invoice_link: Option<String>,
    error: Option<String>,
) -> Result<(), String> {
    crate::require_worker(ctx, "complete_stars_invoice")?;

    let mut invoice = ctx.db.stars_invoice()
        .id()
        .find(&invoice_id)
        .ok_or(GameError::NotFound("invoice"))?;

    if invoice.status != InvoiceStatus::Pending {
        // Already timed out (or answered); the player has seen the outcome
        log::warn!("[STARS] late result for invoice:{} status:{:?} ignored", invoice_id, invoice.status);
        return Ok(());
    }

    match (invoice_link.filter(|l| !l.trim().is_empty()), error) {
        (Some(link), None) => {
            invoice.status = InvoiceStatus::Created;
            invoice.invoice_link = Some(link);
            log::info!("[STARS] invoice:{} created", invoice_id);
        }
        (_, err) => {
            let reason = err.unwrap_or_else(|| "gateway returned no invoice link".to_string());
            invoice.status = InvoiceStatus::Failed;
            invoice.last_error = Some(GameError::Gateway(reason).to_string());
            log::warn!("[STARS] invoice:{} failed: {:?}", invoice_id, invoice.last_error);
        }
    }
    invoice.resolved_at = Some(ctx.timestamp);
    ctx.db.stars_invoice().id().update(invoice);
    Ok(())
}

/// Fail invoices whose outbound call never came back (scheduled reducer)
#[reducer]
pub fn expire_stale_invoices(ctx: &ReducerContext, _schedule: InvoiceSweepSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call expire_stale_invoices", ctx.sender);
        return;
    }

    let stale: Vec<_> = ctx.db.stars_invoice()
        .iter()
        .filter(|i| i.status == InvoiceStatus::Pending && invoice_timed_out(i.created_at, ctx.timestamp))
        .collect();

    for mut invoice in stale {
        invoice.status = InvoiceStatus::Failed;
        invoice.last_error = Some(
            GameError::Gateway(format!("timed out after {}s", INVOICE_TIMEOUT_SECS)).to_string(),
        );
        invoice.resolved_at = Some(ctx.timestamp);
        log::warn!("[STARS] invoice:{} timed out user:{}", invoice.id, invoice.user_id);
        ctx.db.stars_invoice().id().update(invoice);
    }
}

/// Apply a successful Stars payment exactly once per charge id
/// Trusted caller only (payment worker); a replayed charge id is a logged no-op.
/// Every confirmed charge lands in stars_purchase, even when the upgrade falls back to points.
#[reducer]
pub fn confirm_stars_payment(
    ctx: &ReducerContext,
    telegram_id: String,
    payment_charge_id: String,
    total_stars: u32,
    payload: String,
) -> Result<(), String> {
    crate::require_worker(ctx, "confirm_stars_payment")?;

    let charge_id = payment_charge_id.trim().to_string();
    if charge_id.is_empty() {
        return Err(GameError::validation("payment_charge_id", "must not be empty").into());
    }

    let existing = ctx.db.stars_purchase().payment_charge_id().find(&charge_id);
    if let ChargeDecision::AlreadyProcessed { purchase_id } = charge_decision(existing.as_ref()) {
        log::info!("[STARS] charge:{} already processed (purchase:{})",
            crate::short_id(&charge_id), purchase_id);
        return Ok(());
    }

    let mut user = ctx.db.user_account()
        .telegram_id()
        .find(&telegram_id)
        .ok_or(GameError::NotFound("user"))?;
    crate::sync_and_store(ctx, &mut user);

    let reward = parse_reward_payload(&payload, total_stars);
    let upgrade = match &reward {
        StarsReward::Upgrade { key } => ctx.db.upgrade().key().find(key),
        StarsReward::Points(_) => None,
    };
    let lookup = upgrade.as_ref().map(|u| (u, crate::current_upgrade_level(ctx, user.id, u.id)));

    let (reward_type, reward_value) = match settle_reward(&mut user, &reward, lookup, total_stars) {
        Settlement::Upgrade { upgrade_id } => {
            crate::increment_upgrade_level(ctx, user.id, upgrade_id);
            (StarsRewardType::Upgrade, upgrade_id)
        }
        Settlement::Points(points) => {
            if matches!(reward, StarsReward::Upgrade { .. }) {
                log::warn!("[STARS] charge:{} upgrade {:?} not grantable, paid out {} points",
                    crate::short_id(&charge_id), reward, points);
            }
            (StarsRewardType::Points, points)
        }
    };
    user.updated_at = ctx.timestamp;
    ctx.db.user_account().id().update(user.clone());

    ctx.db.stars_purchase().insert(StarsPurchase {
        id: 0, // auto_inc
        payment_charge_id: charge_id.clone(),
        user_id: user.id,
        total_stars,
        reward_type,
        reward_value,
        created_at: ctx.timestamp,
    });

    if let Some(invoice_id) = invoice_id_from_payload(&payload) {
        if let Some(mut invoice) = ctx.db.stars_invoice().id().find(&invoice_id) {
            if invoice.user_id == user.id {
                invoice.status = InvoiceStatus::Paid;
                invoice.resolved_at = Some(ctx.timestamp);
                ctx.db.stars_invoice().id().update(invoice);
            }
        }
    }

    log::info!("[STARS] charge:{} user:{} stars:{} reward:{:?} points:{} stars_spent:{}",
        crate::short_id(&charge_id), user.id, total_stars, reward, user.points, user.stars_spent);
    Ok(())
}
