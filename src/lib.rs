use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp, ScheduleAt,
    table, reducer, view, SpacetimeType,
    client_visibility_filter, Filter,
};

pub mod config;
pub mod economy;
pub mod errors;

// Reducer groups, one module per player-facing subsystem
mod admin;
mod catalog_import;
mod game;
mod leaderboard;
mod payments;
mod referral;
mod tasks;

use config::*;
use errors::GameError;
use leaderboard::broadcast_leaderboard;
use payments::expire_stale_invoices;

// ==================== HELPER FUNCTIONS ====================

/// Short id prefix for log lines (keeps telegram ids out of full logs)
fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

/// Resolve the caller's session to its user row
/// Every player reducer starts here; the gateway owns session creation
fn get_user(ctx: &ReducerContext) -> Result<User, GameError> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or(GameError::Unauthorized)?;

    ctx.db.user_account()
        .telegram_id()
        .find(&session.telegram_id)
        .ok_or(GameError::NotFound("user"))
}

/// Load the caller and bring elapsed-time state (energy, passive income) up to now
/// Persists only when something changed, so repeated calls are a no-op
fn load_synced_user(ctx: &ReducerContext) -> Result<User, GameError> {
    let mut user = get_user(ctx)?;
    sync_and_store(ctx, &mut user);
    Ok(user)
}

/// Time-sync an already loaded row and write it back if it moved
fn sync_and_store(ctx: &ReducerContext, user: &mut User) {
    let sync = economy::time_sync(user, ctx.timestamp);
    if sync.changed {
        ctx.db.user_account().id().update(user.clone());
        log::debug!("[SYNC] user:{} energy:{} passive:+{}", user.id, user.energy, sync.passive_gain);
    }
}

fn is_authorized_worker(ctx: &ReducerContext) -> bool {
    ctx.db.authorized_worker().identity().find(&ctx.sender).is_some()
}

/// Admin operations accept the gateway/admin-panel identity or an ADMIN user session
fn require_admin(ctx: &ReducerContext, operation: &'static str) -> Result<(), GameError> {
    if is_authorized_worker(ctx) {
        return Ok(());
    }
    match get_user(ctx) {
        Ok(user) if user.role == Role::Admin => Ok(()),
        _ => {
            log::warn!("[ADMIN] forbidden {} by {}", operation, ctx.sender);
            Err(GameError::Forbidden(operation))
        }
    }
}

/// Payment confirmations and invoice results come only from the payment worker
fn require_worker(ctx: &ReducerContext, operation: &'static str) -> Result<(), GameError> {
    if is_authorized_worker(ctx) {
        Ok(())
    } else {
        log::warn!("Unauthorized {} attempt by {}", operation, ctx.sender);
        Err(GameError::Forbidden(operation))
    }
}

/// Display name resolution: username, then first name, then a fixed fallback
fn display_name(user: &User) -> String {
    user.username.as_deref()
        .filter(|s| !s.is_empty())
        .or(user.first_name.as_deref().filter(|s| !s.is_empty()))
        .unwrap_or(DISPLAY_NAME_FALLBACK)
        .to_string()
}

/// Current level of one upgrade for one user (0 when never bought)
fn current_upgrade_level(ctx: &ReducerContext, user_id: u64, upgrade_id: u64) -> u32 {
    ctx.db.user_upgrade()
        .pair_key()
        .find(&economy::upgrade_pair_key(user_id, upgrade_id))
        .map(|uu| uu.level)
        .unwrap_or(0)
}

/// Next level row: an existing row moves up exactly one level, a first purchase starts at 1
fn level_up(existing: Option<UserUpgrade>, user_id: u64, upgrade_id: u64, now: Timestamp) -> UserUpgrade {
    match existing {
        Some(mut row) => {
            row.level += 1;
            row.updated_at = now;
            row
        }
        None => UserUpgrade {
            id: 0, // auto_inc
            pair_key: economy::upgrade_pair_key(user_id, upgrade_id),
            user_id,
            upgrade_id,
            level: 1,
            updated_at: now,
        },
    }
}

/// Bump (or create at 1) the user's level for an upgrade
fn increment_upgrade_level(ctx: &ReducerContext, user_id: u64, upgrade_id: u64) -> u32 {
    let existing = ctx.db.user_upgrade()
        .pair_key()
        .find(&economy::upgrade_pair_key(user_id, upgrade_id));
    let is_new = existing.is_none();
    let row = level_up(existing, user_id, upgrade_id, ctx.timestamp);
    let level = row.level;
    if is_new {
        ctx.db.user_upgrade().insert(row);
    } else {
        ctx.db.user_upgrade().id().update(row);
    }
    level
}

// ==================== TABLES ====================

/// Session links ephemeral connection to a verified Telegram identity
/// PRIVATE: written only by the gateway after it validates Telegram init data
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Telegram user id verified by the gateway
    pub telegram_id: String,

    pub connected_at: Timestamp,
}

/// Identities trusted to create sessions, confirm payments and run admin reducers
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum Role {
    User,
    Admin,
}

/// Player economy state (aggregate root)
/// PRIVATE: clients read their own row through the my_user view
#[table(name = user_account)]
#[derive(Clone, Debug)]
pub struct User {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub telegram_id: String,

    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Bot/mini-app language tag, persisted so every instance sees it
    pub language: String,

    pub role: Role,

    /// Never negative: debits happen only after an affordability check
    pub points: u64,

    /// Always within [0, max_energy]
    pub energy: u32,
    pub max_energy: u32,

    /// Base points per tap
    pub tap_power: u32,

    /// Tap cadence streak; multiplier stays within [1.0, 3.5]
    pub combo_count: u32,
    pub combo_multiplier: f64,

    /// Passive points per hour
    pub pph: u64,

    /// Bought with Stars upgrades only
    pub auto_tap_per_hour: u64,

    pub stars_spent: u64,
    pub total_taps: u64,
    pub wallet_address: Option<String>,

    /// Assigned once at creation, never changed
    #[unique]
    pub referral_code: String,

    /// Weak link to the inviting user
    pub referred_by_id: Option<u64>,

    pub last_tap_at: Option<Timestamp>,
    pub last_energy_refill: Timestamp,
    pub last_profit_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Upgrade catalog entry (admin managed)
#[table(name = upgrade, public)]
#[derive(Clone, Debug)]
pub struct Upgrade {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub key: String,

    pub name: String,
    pub description: String,
    pub base_cost: u64,
    pub max_level: u32,

    /// Admin-facing growth knob. The purchase formula uses UPGRADE_COST_EXPONENT instead.
    pub difficulty: f64,

    pub unlock_level: u32,

    /// Price in Stars when the upgrade can be bought with a payment
    pub stars_price: Option<u32>,

    pub pph_boost: u64,
    pub tap_boost: u32,
    pub energy_boost: u32,
    pub auto_tap_boost: u64,

    /// Shown in the shop; unlisted upgrades cannot be bought
    #[index(btree)]
    pub is_listed: bool,
}

/// Per user per upgrade level, created on first purchase and never deleted
#[table(name = user_upgrade)]
#[derive(Clone, Debug)]
pub struct UserUpgrade {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// "{user_id}:{upgrade_id}", the uniqueness constraint on the pair
    #[unique]
    pub pair_key: String,

    #[index(btree)]
    pub user_id: u64,

    pub upgrade_id: u64,
    pub level: u32,
    pub updated_at: Timestamp,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum TaskType {
    Daily,
    Social,
    Cipher,
    Special,
}

/// Task catalog entry
#[table(name = task, public)]
#[derive(Clone, Debug)]
pub struct Task {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub key: String,

    pub title: String,
    pub task_type: TaskType,
    pub reward: u64,
    pub link: Option<String>,
    pub is_daily: bool,
    pub is_active: bool,
}

/// One row per claim. The claim key embeds the UTC day for daily tasks,
/// so the unique constraint allows one claim per day (or one ever).
#[table(name = user_task)]
pub struct UserTask {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub claim_key: String,

    #[index(btree)]
    pub user_id: u64,

    pub task_id: u64,
    pub reward: u64,
    pub claimed_at: Timestamp,
}

/// Today's cipher word, keyed by UTC day bucket (YYYYMMDD)
#[table(name = daily_cipher)]
pub struct DailyCipher {
    #[primary_key]
    pub day: String,

    pub word: String,
    pub set_at: Timestamp,
}

/// Booster window applying a global point multiplier (broadcast to all clients)
#[table(name = special_event, public)]
#[derive(Clone, Debug)]
pub struct SpecialEvent {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub key: String,

    pub title: String,
    pub description: String,

    /// Between 1 and 10
    pub multiplier: f64,

    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub is_active: bool,
}

/// Immutable audit record, one per tap batch; feeds the weekly leaderboard
#[table(name = tap_event)]
#[derive(Clone, Debug)]
pub struct TapEvent {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: u64,

    pub taps: u32,
    pub points_earned: u64,
    pub combo_multiplier: f64,
    pub event_multiplier: f64,
    pub created_at: Timestamp,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum StarsRewardType {
    Upgrade,
    Points,
}

/// Payment ledger, unique on the upstream charge id for idempotency
#[table(name = stars_purchase)]
pub struct StarsPurchase {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub payment_charge_id: String,

    #[index(btree)]
    pub user_id: u64,

    pub total_stars: u32,
    pub reward_type: StarsRewardType,

    /// Upgrade id for upgrade rewards, points credited for point rewards
    pub reward_value: u64,

    pub created_at: Timestamp,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum InvoiceStatus {
    Pending,
    Created,
    Failed,
    Paid,
}

/// Outbound invoice requests, processed by the payment worker
/// SECURITY: Public table with RLS protection - only authorized workers can see rows
#[table(name = stars_invoice, public)]
#[derive(Clone, Debug)]
pub struct StarsInvoice {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: u64,

    /// Telegram chat the worker sends the invoice to
    pub telegram_id: String,

    /// JSON reward payload echoed back on payment confirmation
    pub payload: String,

    pub stars_price: u32,
    pub status: InvoiceStatus,
    pub invoice_link: Option<String>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

/// Point balance frozen for an airdrop batch (or an individual claim)
#[table(name = airdrop_snapshot)]
#[derive(Clone, Debug)]
pub struct AirdropSnapshot {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: u64,

    pub points: u64,
    pub token_amount: f64,
    pub wallet_address: Option<String>,

    #[index(btree)]
    pub batch: String,

    pub created_at: Timestamp,
}

/// Referral counters, maintained in the signup transaction
#[table(name = referral_summary)]
#[derive(Clone, Debug)]
pub struct ReferralSummary {
    #[primary_key]
    pub user_id: u64,

    pub invited_count: u32,
    pub bonus_earned: u64,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum LeaderboardKind {
    Global,
    Weekly,
    Friends,
}

/// Ranked rows produced for one viewer's leaderboard request
#[table(name = leaderboard_entry, public)]
pub struct LeaderboardEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// User who requested this board
    #[index(btree)]
    pub viewer_id: u64,

    pub kind: LeaderboardKind,

    /// 1-based position
    pub position: u32,

    pub user_id: u64,
    pub display_name: String,
    pub score: u64,
}

/// Shared top board, pushed to every subscriber after taps
#[table(name = top_player, public)]
pub struct TopPlayer {
    #[primary_key]
    pub position: u32,

    pub user_id: u64,
    pub display_name: String,
    pub points: u64,
}

/// One-shot debounce for the shared top board refresh
#[table(name = leaderboard_broadcast_schedule, scheduled(broadcast_leaderboard))]
pub struct LeaderboardBroadcastSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub scheduled_at: ScheduleAt,
}

/// Periodic sweep failing invoices the worker never answered
#[table(name = invoice_sweep_schedule, scheduled(expire_stale_invoices))]
pub struct InvoiceSweepSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub scheduled_at: ScheduleAt,
}

// ==================== VIEWS ====================

/// Upgrade catalog entry enriched with the caller's progress
#[derive(SpacetimeType, Clone, Debug)]
pub struct UpgradeOffer {
    pub upgrade: Upgrade,
    pub current_level: u32,

    /// None once the upgrade is maxed
    pub next_cost: Option<u64>,
}

fn upgrade_offer(upgrade: Upgrade, current_level: u32) -> UpgradeOffer {
    let next_cost = economy::next_upgrade_cost(&upgrade, current_level);
    UpgradeOffer { upgrade, current_level, next_cost }
}

fn view_user(ctx: &spacetimedb::ViewContext) -> Option<User> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.user_account().telegram_id().find(&session.telegram_id)
}

/// View: Returns only the current user's economy row
/// Values are as of the last sync; clients call sync_me before reading
#[view(name = my_user, public)]
fn my_user(ctx: &spacetimedb::ViewContext) -> Option<User> {
    view_user(ctx)
}

/// View: Upgrade catalog with current level and next cost for the caller
#[view(name = my_upgrades, public)]
fn my_upgrades(ctx: &spacetimedb::ViewContext) -> Vec<UpgradeOffer> {
    let Some(user) = view_user(ctx) else {
        return Vec::new();
    };
    ctx.db.upgrade()
        .is_listed()
        .filter(true)
        .map(|upgrade| {
            let current_level = ctx.db.user_upgrade()
                .pair_key()
                .find(&economy::upgrade_pair_key(user.id, upgrade.id))
                .map(|uu| uu.level)
                .unwrap_or(0);
            upgrade_offer(upgrade, current_level)
        })
        .collect()
}

#[view(name = my_referral_summary, public)]
fn my_referral_summary(ctx: &spacetimedb::ViewContext) -> Option<ReferralSummary> {
    let user = view_user(ctx)?;
    ctx.db.referral_summary().user_id().find(&user.id)
}

/// Newest tap batches first, at most `limit`
fn recent_taps(mut events: Vec<TapEvent>, limit: usize) -> Vec<TapEvent> {
    events.sort_by(|a, b| b.id.cmp(&a.id));
    events.truncate(limit);
    events
}

/// View: The caller's recent tap batch results (points earned, combo, event multiplier)
#[view(name = my_tap_events, public)]
fn my_tap_events(ctx: &spacetimedb::ViewContext) -> Vec<TapEvent> {
    match view_user(ctx) {
        Some(user) => recent_taps(ctx.db.tap_event().user_id().filter(&user.id).collect(), RECENT_TAP_EVENTS),
        None => Vec::new(),
    }
}

#[view(name = my_airdrop_snapshots, public)]
fn my_airdrop_snapshots(ctx: &spacetimedb::ViewContext) -> Vec<AirdropSnapshot> {
    match view_user(ctx) {
        Some(user) => ctx.db.airdrop_snapshot().user_id().filter(&user.id).collect(),
        None => Vec::new(),
    }
}

#[view(name = my_invoices, public)]
fn my_invoices(ctx: &spacetimedb::ViewContext) -> Vec<StarsInvoice> {
    match view_user(ctx) {
        Some(user) => ctx.db.stars_invoice().user_id().filter(&user.id).collect(),
        None => Vec::new(),
    }
}

// ==================== ROW LEVEL SECURITY ====================

/// RLS Filter: Only authorized workers can see the invoice queue
/// Players read their own invoices through my_invoices
#[client_visibility_filter]
const STARS_INVOICE_VISIBILITY: Filter = Filter::Sql(
    "SELECT si.* FROM stars_invoice si
     JOIN authorized_worker aw WHERE aw.identity = :sender"
);

// ==================== REDUCERS ====================

/// Initialize module - owner becomes an authorized worker, sweeps get scheduled
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    // Check if scheduler already exists to avoid duplicates on hot-reload
    if ctx.db.invoice_sweep_schedule().iter().count() == 0 {
        ctx.db.invoice_sweep_schedule().insert(InvoiceSweepSchedule {
            id: 0, // auto_inc
            scheduled_at: ScheduleAt::Interval(
                std::time::Duration::from_secs(INVOICE_SWEEP_INTERVAL_SECS).into(),
            ),
        });
    }

    log::info!("Tap economy module initialized");
}

/// Create a verified session for a client identity
/// Called by the gateway AFTER it validates the Telegram init data signature
#[reducer]
pub fn create_session(ctx: &ReducerContext, client_identity: String, telegram_id: String) -> Result<(), String> {
    require_worker(ctx, "create_session")?;

    let identity = Identity::from_hex(&client_identity)
        .map_err(|_| GameError::validation("client_identity", "is not a valid identity hex string"))?;
    if telegram_id.trim().is_empty() {
        return Err(GameError::validation("telegram_id", "must not be empty").into());
    }

    // Delete stale sessions: same account (unclean reconnect) OR same connection (prevents PK conflict)
    let stale_sessions: Vec<_> = ctx.db.session()
        .iter()
        .filter(|s| s.telegram_id == telegram_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        telegram_id: telegram_id.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!("[SESSION] created tg:{} ws:{}", short_id(&telegram_id), short_id(&client_identity));
    Ok(())
}

/// Player login. First login creates the account and applies the referral bonus;
/// returning logins refresh display fields and run the time sync.
#[reducer]
pub fn connect(
    ctx: &ReducerContext,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    language: Option<String>,
    referral_code: Option<String>,
) -> Result<(), String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or(GameError::Unauthorized)?;
    let telegram_id = session.telegram_id;

    if let Some(mut existing) = ctx.db.user_account().telegram_id().find(&telegram_id) {
        let sync = economy::time_sync(&mut existing, ctx.timestamp);
        existing.username = username;
        existing.first_name = first_name;
        existing.last_name = last_name;
        if let Some(lang) = language.filter(|l| !l.trim().is_empty()) {
            existing.language = lang;
        }
        existing.updated_at = ctx.timestamp;
        ctx.db.user_account().id().update(existing.clone());

        // Wide event: one canonical log with full player context
        log::info!("[CONNECT] user:{} tg:{} type=returning points={} energy={}/{} pph={} passive=+{}",
            existing.id, short_id(&telegram_id), existing.points, existing.energy,
            existing.max_energy, existing.pph, sync.passive_gain);
        return Ok(());
    }

    let code = referral::generate_referral_code(ctx, &telegram_id);
    let mut new_user = User {
        id: 0, // auto_inc
        telegram_id: telegram_id.clone(),
        username,
        first_name,
        last_name,
        language: language.filter(|l| !l.trim().is_empty()).unwrap_or_else(|| "en".to_string()),
        role: Role::User,
        points: 0,
        energy: DEFAULT_MAX_ENERGY,
        max_energy: DEFAULT_MAX_ENERGY,
        tap_power: DEFAULT_TAP_POWER,
        combo_count: 0,
        combo_multiplier: 1.0,
        pph: 0,
        auto_tap_per_hour: 0,
        stars_spent: 0,
        total_taps: 0,
        wallet_address: None,
        referral_code: code,
        referred_by_id: None,
        last_tap_at: None,
        last_energy_refill: ctx.timestamp,
        last_profit_at: ctx.timestamp,
        created_at: ctx.timestamp,
        updated_at: ctx.timestamp,
    };

    // Referrer's elapsed state is brought current before the bonus lands
    let referrer = referral::resolve_referrer(ctx, referral_code.as_deref())
        .and_then(|mut referrer| {
            economy::time_sync(&mut referrer, ctx.timestamp);
            referral::apply_signup_bonus(&mut new_user, &mut referrer).then_some(referrer)
        });

    let inserted = ctx.db.user_account().try_insert(new_user)?;
    ctx.db.referral_summary().insert(ReferralSummary {
        user_id: inserted.id,
        invited_count: 0,
        bonus_earned: 0,
    });

    if let Some(referrer) = referrer {
        referral::record_referral(ctx, referrer, inserted.id);
    }

    log::info!("[CONNECT] user:{} tg:{} type=new referred={} code={}",
        inserted.id, short_id(&telegram_id), inserted.referred_by_id.is_some(), inserted.referral_code);
    Ok(())
}

/// Persist the language tag (bot and mini-app share it across instances)
#[reducer]
pub fn set_language(ctx: &ReducerContext, language: String) -> Result<(), String> {
    let lang = language.trim();
    if lang.is_empty() || lang.len() > 8 {
        return Err(GameError::validation("language", "must be a short language tag").into());
    }
    let mut user = get_user(ctx)?;
    user.language = lang.to_string();
    user.updated_at = ctx.timestamp;
    ctx.db.user_account().id().update(user);
    Ok(())
}

/// Clean up session when the client disconnects
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) {
        let session_duration_secs = ctx.timestamp.duration_since(session.connected_at)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        log::info!("[DISCONNECT] tg:{} session_min:{:.1}",
            short_id(&session.telegram_id), session_duration_secs as f32 / 60.0);
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}
