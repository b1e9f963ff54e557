// ==================== GAME BALANCE CONSTANTS ====================
// Every economy number lives here so balancing changes are a one-file diff.

/// Energy regenerated per elapsed whole minute
pub const ENERGY_REGEN_PER_MINUTE: u64 = 10;

/// Starting values for a freshly created user
pub const DEFAULT_MAX_ENERGY: u32 = 1000;
pub const DEFAULT_TAP_POWER: u32 = 1;

/// Taps arriving within this window of the previous batch extend the combo
pub const COMBO_WINDOW_MS: i64 = 2000;
pub const COMBO_MAX_COUNT: u32 = 100;
pub const COMBO_STEP: f64 = 0.03;
pub const COMBO_MAX_MULTIPLIER: f64 = 3.5;

/// Accepted tap batch size per request (client batches taps client-side)
pub const MIN_TAPS_PER_REQUEST: u32 = 1;
pub const MAX_TAPS_PER_REQUEST: u32 = 30;

/// Upgrade cost growth: cost = floor(base_cost × (level + 1)^UPGRADE_COST_EXPONENT)
/// NOTE: applies to every upgrade; the catalog `difficulty` column is not consulted.
pub const UPGRADE_COST_EXPONENT: f64 = 1.32;

/// Special event multiplier bounds (admin input validation)
pub const EVENT_MIN_MULTIPLIER: f64 = 1.0;
pub const EVENT_MAX_MULTIPLIER: f64 = 10.0;

/// One-time signup bonus pair
pub const REFERRER_BONUS: u64 = 2000;
pub const REFERRED_BONUS: u64 = 1000;

/// Referral code shape: PREFIX + last chars of telegram id + random tail
pub const REFERRAL_CODE_PREFIX: &str = "TAP";
pub const REFERRAL_ID_SUFFIX_LEN: usize = 6;
pub const REFERRAL_RANDOM_LEN: usize = 4;
pub const REFERRAL_FALLBACK_RANDOM_LEN: usize = 12;
pub const REFERRAL_CODE_ATTEMPTS: u32 = 8;

/// Airdrop: minimum balance to claim, and points per token
pub const AIRDROP_MIN_POINTS: u64 = 10_000;
pub const POINTS_PER_TOKEN: u64 = 1000;
pub const AIRDROP_CLAIM_BATCH: &str = "claim";

/// Leaderboard request bounds and the size of the shared top board
pub const LEADERBOARD_MIN_LIMIT: u32 = 3;
pub const LEADERBOARD_MAX_LIMIT: u32 = 100;
pub const TOP_BOARD_SIZE: usize = 20;
pub const WEEKLY_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;
pub const DISPLAY_NAME_FALLBACK: &str = "Anonymous";

/// Stars payments: fallback conversion and invoice lifetime before the worker must answer
pub const POINTS_PER_STAR: u64 = 250;
pub const INVOICE_TIMEOUT_SECS: u64 = 15;
pub const INVOICE_SWEEP_INTERVAL_SECS: u64 = 10;

/// Tap batches returned by the my_tap_events view
pub const RECENT_TAP_EVENTS: usize = 20;

/// Leaderboard broadcast debounce after a tap
pub const LEADERBOARD_BROADCAST_DELAY_MS: u64 = 1000;
