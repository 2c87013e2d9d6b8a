//! Error types for the Earnly reward ledger and workflows

use rust_decimal::Decimal;

/// Result type for reward operations
pub type RewardResult<T> = std::result::Result<T, RewardError>;

/// Reward error types
#[derive(thiserror::Error, Debug)]
pub enum RewardError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Amount {amount} is below the minimum withdrawal of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Task is inactive: {0}")]
    TaskInactive(String),

    #[error("A submission for task {task} is already {status}")]
    DuplicateSubmission { task: String, status: String },

    #[error("Completion already reviewed: {0}")]
    AlreadyReviewed(String),

    #[error("Withdrawal already decided: {0}")]
    AlreadyDecided(String),

    #[error("Account is blocked: {0}")]
    AccountBlocked(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Operation requires an administrator: {0}")]
    NotPrivileged(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid admin settings: {0}")]
    InvalidSettings(String),

    #[error("Engagement not completed for account {0}")]
    EngagementIncomplete(String),

    #[error("Daily bonus already claimed today by {0}")]
    DailyBonusClaimed(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RewardError {
    /// Shorthand for a missing record
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RewardError::NotFound { kind, id: id.into() }
    }

    /// Shorthand for an insufficient points balance
    pub fn insufficient_points(required: u64, available: u64) -> Self {
        RewardError::InsufficientFunds {
            required: Decimal::from(required),
            available: Decimal::from(available),
        }
    }

    /// Check if the caller may retry the same operation unchanged
    pub fn is_recoverable(&self) -> bool {
        match self {
            RewardError::StorageUnavailable(_) => true,
            RewardError::Io(_) => true,
            RewardError::EngagementIncomplete(_) => true,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> RewardErrorCategory {
        match self {
            RewardError::InsufficientFunds { .. }
            | RewardError::BelowMinimum { .. }
            | RewardError::InvalidAmount(_) => RewardErrorCategory::Funds,
            RewardError::TaskInactive(_)
            | RewardError::InvalidTask(_)
            | RewardError::DuplicateSubmission { .. }
            | RewardError::AlreadyReviewed(_) => RewardErrorCategory::Verification,
            RewardError::AlreadyDecided(_) => RewardErrorCategory::Withdrawal,
            RewardError::AccountBlocked(_)
            | RewardError::NotPrivileged(_)
            | RewardError::AccountExists(_) => RewardErrorCategory::Account,
            RewardError::NotFound { .. } => RewardErrorCategory::NotFound,
            RewardError::EngagementIncomplete(_) | RewardError::DailyBonusClaimed(_) => {
                RewardErrorCategory::Engagement
            }
            RewardError::InvalidSettings(_) | RewardError::Configuration(_) => {
                RewardErrorCategory::Configuration
            }
            RewardError::StorageUnavailable(_)
            | RewardError::Serialization(_)
            | RewardError::Io(_) => RewardErrorCategory::Storage,
        }
    }
}

impl From<toml::de::Error> for RewardError {
    fn from(err: toml::de::Error) -> Self {
        RewardError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for RewardError {
    fn from(err: toml::ser::Error) -> Self {
        RewardError::Configuration(err.to_string())
    }
}

/// Reward error categories for handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardErrorCategory {
    Funds,
    Verification,
    Withdrawal,
    Account,
    NotFound,
    Engagement,
    Configuration,
    Storage,
}
