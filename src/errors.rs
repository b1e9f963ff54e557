use std::fmt;

/// Reducer failure taxonomy
///
/// Every variant is terminal for the request. Reducers return `Result<(), String>`,
/// and `?` converts through `From<GameError> for String`, so an `Err` rolls the
/// whole transaction back and no partial state survives.
#[derive(Debug, Clone, PartialEq)]
pub enum GameError {
    /// Malformed or out-of-range input, with the offending field
    Validation { field: &'static str, reason: String },
    /// User, upgrade, task, event or invoice missing
    NotFound(&'static str),
    /// No session for this connection
    Unauthorized,
    /// Caller lacks the role for this operation
    Forbidden(&'static str),
    EnergyDepleted,
    InsufficientPoints { cost: u64, balance: u64 },
    MaxLevelReached { max_level: u32 },
    AlreadyClaimed,
    TaskInactive,
    InvalidCipher,
    InvalidEventWindow,
    AirdropThreshold { required: u64, balance: u64 },
    DuplicateKey(&'static str),
    /// Payment gateway unreachable, rejected, or timed out
    Gateway(String),
}

impl GameError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        GameError::Validation { field, reason: reason.into() }
    }

    /// Category tag clients switch on (prefix of the reducer error string)
    pub fn category(&self) -> &'static str {
        match self {
            GameError::Validation { .. } => "VALIDATION",
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::Unauthorized => "UNAUTHORIZED",
            GameError::Forbidden(_) => "FORBIDDEN",
            GameError::Gateway(_) => "GATEWAY",
            _ => "BUSINESS_RULE",
        }
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.category())?;
        match self {
            GameError::Validation { field, reason } => write!(f, "{} {}", field, reason),
            GameError::NotFound(what) => write!(f, "{} not found", what),
            GameError::Unauthorized => write!(f, "no session, verify with gateway first"),
            GameError::Forbidden(op) => write!(f, "{} not permitted for this caller", op),
            GameError::EnergyDepleted => write!(f, "energy depleted"),
            GameError::InsufficientPoints { cost, balance } => {
                write!(f, "insufficient points (cost {}, balance {})", cost, balance)
            }
            GameError::MaxLevelReached { max_level } => write!(f, "upgrade already at max level {}", max_level),
            GameError::AlreadyClaimed => write!(f, "task already claimed"),
            GameError::TaskInactive => write!(f, "task is not active"),
            GameError::InvalidCipher => write!(f, "invalid daily cipher"),
            GameError::InvalidEventWindow => write!(f, "event must end after it starts"),
            GameError::AirdropThreshold { required, balance } => {
                write!(f, "airdrop requires {} points (balance {})", required, balance)
            }
            GameError::DuplicateKey(what) => write!(f, "{} key already exists", what),
            GameError::Gateway(reason) => write!(f, "payment gateway error: {}", reason),
        }
    }
}

impl std::error::Error for GameError {}

impl From<GameError> for String {
    fn from(err: GameError) -> Self {
        err.to_string()
    }
}
