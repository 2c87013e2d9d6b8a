//! Type definitions for the Earnly reward ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RewardError, RewardResult};

/// Opaque account identifier supplied by the identity provider
pub type AccountId = String;
/// Task identifier
pub type TaskId = String;
/// Task completion identifier
pub type CompletionId = String;
/// Withdrawal request identifier
pub type WithdrawalId = String;
/// Handle to an uploaded proof, issued by proof storage
pub type ProofRef = String;

/// Currencies held by an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// Withdrawable balance
    Primary,
    /// Non-withdrawable in-app points
    Points,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Primary => write!(f, "primary"),
            Currency::Points => write!(f, "points"),
        }
    }
}

/// A reward amount tagged with its currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "currency", content = "amount", rename_all = "lowercase")]
pub enum Reward {
    Primary(Decimal),
    Points(u64),
}

impl Reward {
    /// Currency the reward is paid in
    pub fn currency(&self) -> Currency {
        match self {
            Reward::Primary(_) => Currency::Primary,
            Reward::Points(_) => Currency::Points,
        }
    }

    /// Rewards must grant something
    pub fn validate(&self) -> RewardResult<()> {
        match self {
            Reward::Primary(amount) if *amount <= Decimal::ZERO => Err(RewardError::InvalidAmount(
                format!("task reward must be positive, got {amount}"),
            )),
            Reward::Points(0) => Err(RewardError::InvalidAmount(
                "task reward must be positive, got 0 points".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reward::Primary(amount) => write!(f, "{amount} primary"),
            Reward::Points(points) => write!(f, "{points} points"),
        }
    }
}

/// Both balances of an account at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub primary: Decimal,
    pub points: u64,
}

/// Session handed over by the identity provider once the mobile number is verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSession {
    pub account_id: AccountId,
    pub mobile: String,
}

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub mobile: String,
    pub balance: Decimal,
    pub points: u64,
    pub completed_tasks: u32,
    pub is_admin: bool,
    pub is_blocked: bool,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub referral_count: u32,
    pub referral_income: Decimal,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub last_daily_bonus: Option<NaiveDate>,
}

impl Account {
    /// Current balances
    pub fn balances(&self) -> Balances {
        Balances {
            primary: self.balance,
            points: self.points,
        }
    }

    /// Refuse any reward or withdrawal for blocked accounts
    pub fn ensure_active(&self) -> RewardResult<()> {
        if self.is_blocked {
            return Err(RewardError::AccountBlocked(self.id.clone()));
        }
        Ok(())
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Inactive,
}

impl TaskStatus {
    /// The opposite status
    pub fn toggled(self) -> Self {
        match self {
            TaskStatus::Active => TaskStatus::Inactive,
            TaskStatus::Inactive => TaskStatus::Active,
        }
    }
}

/// Sponsored task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub link: String,
    pub reward: Reward,
    pub logo: String,
    pub status: TaskStatus,
    pub posted_at: DateTime<Utc>,
}

/// Admin input for a new task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub link: String,
    pub reward: Reward,
    pub logo: String,
}

/// A task as seen by one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task: Task,
    pub submission: Option<CompletionStatus>,
}

/// Verification status of a task completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Pending,
    Approved,
    Rejected,
}

impl CompletionStatus {
    /// Approved and rejected completions take no further review
    pub fn is_terminal(self) -> bool {
        !matches!(self, CompletionStatus::Pending)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Pending => write!(f, "pending"),
            CompletionStatus::Approved => write!(f, "approved"),
            CompletionStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One account's claim on one task's reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub id: CompletionId,
    pub account_id: AccountId,
    pub task_id: TaskId,
    pub proof: ProofRef,
    pub status: CompletionStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Admin verdict on a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Payout rail for a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutMethod {
    #[serde(rename = "UPI")]
    Upi,
    #[serde(rename = "BANK")]
    Bank,
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutMethod::Upi => write!(f, "UPI"),
            PayoutMethod::Bank => write!(f, "BANK"),
        }
    }
}

/// Where a payout goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutDetails {
    Upi { upi_id: String },
    Bank { account_no: String, ifsc: String },
}

impl PayoutDetails {
    /// Payout rail
    pub fn method(&self) -> PayoutMethod {
        match self {
            PayoutDetails::Upi { .. } => PayoutMethod::Upi,
            PayoutDetails::Bank { .. } => PayoutMethod::Bank,
        }
    }

    /// Flattened destination stored on the request
    pub fn destination(&self) -> String {
        match self {
            PayoutDetails::Upi { upi_id } => upi_id.clone(),
            PayoutDetails::Bank { account_no, ifsc } => format!("{account_no}|{ifsc}"),
        }
    }
}

/// Withdrawal request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawalStatus::Pending => write!(f, "pending"),
            WithdrawalStatus::Approved => write!(f, "approved"),
            WithdrawalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Admin verdict on a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WithdrawalAction {
    Approve,
    Reject,
}

/// Payout request, funds already debited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub account_id: AccountId,
    pub account_name: String,
    pub account_mobile: String,
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Fee breakdown shown before a withdrawal is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalQuote {
    pub amount: Decimal,
    pub fee: Decimal,
    pub payable: Decimal,
}

/// Process-wide tunables, mutated only by administrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSettings {
    pub min_withdraw: Decimal,
    pub referral_bonus_primary: Decimal,
    pub referral_bonus_points: u64,
    pub platform_fee_percent: Decimal,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            min_withdraw: dec!(200),
            referral_bonus_primary: dec!(5),
            referral_bonus_points: 200,
            platform_fee_percent: dec!(5),
        }
    }
}

impl AdminSettings {
    /// Validate settings before they are stored
    pub fn validate(&self) -> RewardResult<()> {
        if self.min_withdraw <= Decimal::ZERO {
            return Err(RewardError::InvalidSettings(
                "minimum withdrawal must be positive".to_string(),
            ));
        }
        if self.referral_bonus_primary < Decimal::ZERO {
            return Err(RewardError::InvalidSettings(
                "referral bonus cannot be negative".to_string(),
            ));
        }
        if self.platform_fee_percent < Decimal::ZERO || self.platform_fee_percent > dec!(100) {
            return Err(RewardError::InvalidSettings(format!(
                "platform fee must be between 0 and 100 percent, got {}",
                self.platform_fee_percent
            )));
        }
        Ok(())
    }
}

/// Administrative actions recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminAction {
    AddTask,
    ToggleTask,
    ApproveProof,
    RejectProof,
    Approve,
    Reject,
    BlockUser,
    UnblockUser,
    UpdateSettings,
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdminAction::AddTask => "ADD_TASK",
            AdminAction::ToggleTask => "TOGGLE_TASK",
            AdminAction::ApproveProof => "APPROVE_PROOF",
            AdminAction::RejectProof => "REJECT_PROOF",
            AdminAction::Approve => "APPROVE",
            AdminAction::Reject => "REJECT",
            AdminAction::BlockUser => "BLOCK_USER",
            AdminAction::UnblockUser => "UNBLOCK_USER",
            AdminAction::UpdateSettings => "UPDATE_SETTINGS",
        };
        f.write_str(name)
    }
}

/// Audit log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminLogEntry {
    pub admin_id: AccountId,
    pub action: AdminAction,
    pub target: String,
    pub details: String,
    pub time: DateTime<Utc>,
}

/// Mini-games that pay out points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Spin,
    Scratch,
    Quiz,
}

/// Why a ledger mutation happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryReason {
    SignupBonus,
    TaskReward { task_id: TaskId },
    Conversion,
    WithdrawalDebit { withdrawal_id: WithdrawalId },
    WithdrawalRefund { withdrawal_id: WithdrawalId },
    DailyBonus,
    RewardedAd,
    Game { game: GameKind },
}

/// Journal line for one applied ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account_id: AccountId,
    pub primary_delta: Decimal,
    pub points_delta: i64,
    pub reason: EntryReason,
    pub recorded_at: DateTime<Utc>,
}
