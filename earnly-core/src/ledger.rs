//! Balance ledger and the points conversion rule
//!
//! All balance changes run as one read-modify-write inside [`RewardStore::update_account`]. Nothing here computes a new balance
//! from a copy read earlier.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::RewardStore;
use crate::{Account, Balances, EntryReason, LedgerEntry, Reward, RewardError, RewardResult};

/// Points exchanged for one primary unit
pub const POINTS_PER_UNIT: u64 = 100;

/// Signed change to both balances of one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub primary: Decimal,
    pub points: i64,
}

impl BalanceDelta {
    /// Primary-only delta
    pub fn primary(amount: Decimal) -> Self {
        Self {
            primary: amount,
            points: 0,
        }
    }

    /// Points-only delta
    pub fn points(points: i64) -> Self {
        Self {
            primary: Decimal::ZERO,
            points,
        }
    }

    /// Credit for a reward
    pub fn reward(reward: &Reward) -> RewardResult<Self> {
        match reward {
            Reward::Primary(amount) => Ok(Self::primary(*amount)),
            Reward::Points(points) => i64::try_from(*points)
                .map(Self::points)
                .map_err(|_| RewardError::InvalidAmount(format!("{points} points is out of range"))),
        }
    }

    /// True if neither leg changes anything
    pub fn is_zero(&self) -> bool {
        self.primary.is_zero() && self.points == 0
    }

    /// Apply both legs or neither
    fn apply_to(&self, account: &mut Account) -> RewardResult<()> {
        let primary = account
            .balance
            .checked_add(self.primary)
            .ok_or_else(|| RewardError::InvalidAmount("primary balance overflow".to_string()))?;
        if primary < Decimal::ZERO {
            return Err(RewardError::InsufficientFunds {
                required: -self.primary,
                available: account.balance,
            });
        }

        let magnitude = self.points.unsigned_abs();
        let points = if self.points >= 0 {
            account
                .points
                .checked_add(magnitude)
                .ok_or_else(|| RewardError::InvalidAmount("points balance overflow".to_string()))?
        } else {
            account
                .points
                .checked_sub(magnitude)
                .ok_or_else(|| RewardError::insufficient_points(magnitude, account.points))?
        };

        account.balance = primary;
        account.points = points;
        Ok(())
    }
}

/// Result of a points conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub points_debited: u64,
    pub primary_credited: Decimal,
}

impl Conversion {
    /// Whole-unit conversion of a points balance; `None` below one unit
    pub fn for_points(points: u64) -> Option<Self> {
        let whole_units = points / POINTS_PER_UNIT;
        if whole_units == 0 {
            return None;
        }
        Some(Self {
            points_debited: whole_units * POINTS_PER_UNIT,
            primary_credited: Decimal::from(whole_units),
        })
    }

    fn as_delta(&self) -> RewardResult<BalanceDelta> {
        let points = i64::try_from(self.points_debited)
            .map_err(|_| RewardError::InvalidAmount("conversion out of range".to_string()))?;
        Ok(BalanceDelta {
            primary: self.primary_credited,
            points: -points,
        })
    }
}

/// Owner of every balance mutation
#[derive(Debug, Clone)]
pub struct Ledger {
    store: Arc<dyn RewardStore>,
}

impl Ledger {
    /// Create a ledger over a store
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        Self { store }
    }

    /// Apply a signed delta and return the resulting balances
    pub async fn apply_delta(
        &self,
        account_id: &str,
        delta: BalanceDelta,
        reason: EntryReason,
    ) -> RewardResult<Balances> {
        self.apply_delta_with(account_id, delta, reason, |_| Ok(()))
            .await
            .map(|account| account.balances())
    }

    /// Apply a delta together with extra account changes in the same atomic update.
    ///
    /// `also` runs first and may veto the whole mutation. Blocked accounts are refused.
    pub async fn apply_delta_with<F>(
        &self,
        account_id: &str,
        delta: BalanceDelta,
        reason: EntryReason,
        also: F,
    ) -> RewardResult<Account>
    where
        F: FnOnce(&mut Account) -> RewardResult<()> + Send,
    {
        self.mutate(account_id, delta, reason, true, also).await
    }

    /// Return a reserved withdrawal amount. Blocked accounts still get their money back.
    pub(crate) async fn refund_withdrawal(
        &self,
        account_id: &str,
        amount: Decimal,
        withdrawal_id: &str,
    ) -> RewardResult<Balances> {
        let reason = EntryReason::WithdrawalRefund {
            withdrawal_id: withdrawal_id.to_string(),
        };
        self.mutate(account_id, BalanceDelta::primary(amount), reason, false, |_| Ok(()))
            .await
            .map(|account| account.balances())
    }

    async fn mutate<F>(
        &self,
        account_id: &str,
        delta: BalanceDelta,
        reason: EntryReason,
        require_active: bool,
        also: F,
    ) -> RewardResult<Account>
    where
        F: FnOnce(&mut Account) -> RewardResult<()> + Send,
    {
        if delta.is_zero() {
            return Err(RewardError::InvalidAmount(format!(
                "empty ledger delta for {account_id}"
            )));
        }

        let account = self
            .store
            .update_account(
                account_id,
                Box::new(move |account: &mut Account| {
                    if require_active {
                        account.ensure_active()?;
                    }
                    also(account)?;
                    delta.apply_to(account)
                }),
            )
            .await?;

        tracing::info!(
            "Ledger {:?} for {}: primary {}, points {} -> {} / {}",
            reason,
            account_id,
            delta.primary,
            delta.points,
            account.balance,
            account.points
        );
        self.journal(account_id, delta, reason).await;

        Ok(account)
    }

    /// Convert whole batches of points into primary currency.
    ///
    /// Both legs are one store update. Returns `None` without touching the account when fewer
    /// than [`POINTS_PER_UNIT`] points are held.
    pub async fn convert_points(&self, account_id: &str) -> RewardResult<Option<Conversion>> {
        let mut converted = None;
        let slot = &mut converted;
        let account = self
            .store
            .update_account(
                account_id,
                Box::new(move |account: &mut Account| {
                    account.ensure_active()?;
                    if let Some(conversion) = Conversion::for_points(account.points) {
                        conversion.as_delta()?.apply_to(account)?;
                        *slot = Some(conversion);
                    }
                    Ok(())
                }),
            )
            .await?;

        match converted {
            Some(conversion) => {
                tracing::info!(
                    "Converted {} points into {} for {} (points left: {})",
                    conversion.points_debited,
                    conversion.primary_credited,
                    account_id,
                    account.points
                );
                self.journal(account_id, conversion.as_delta()?, EntryReason::Conversion)
                    .await;
            }
            None => {
                tracing::debug!(
                    "Conversion skipped for {}: {} points is below one unit",
                    account_id,
                    account.points
                );
            }
        }

        Ok(converted)
    }

    /// Current balances of an account
    pub async fn balances(&self, account_id: &str) -> RewardResult<Balances> {
        self.store
            .get_account(account_id)
            .await?
            .map(|account| account.balances())
            .ok_or_else(|| RewardError::not_found("account", account_id))
    }

    /// Journal lines of an account, oldest first
    pub async fn history(&self, account_id: &str) -> RewardResult<Vec<LedgerEntry>> {
        self.store.list_ledger_entries(account_id).await
    }

    /// Record a signup grant that was written as part of account creation
    pub(crate) async fn journal_signup(&self, account: &Account) {
        let delta = BalanceDelta {
            primary: account.balance,
            points: i64::try_from(account.points).unwrap_or(i64::MAX),
        };
        self.journal(&account.id, delta, EntryReason::SignupBonus).await;
    }

    async fn journal(&self, account_id: &str, delta: BalanceDelta, reason: EntryReason) {
        let entry = LedgerEntry {
            account_id: account_id.to_string(),
            primary_delta: delta.primary,
            points_delta: delta.points,
            reason,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.append_ledger_entry(entry).await {
            tracing::warn!("Ledger journal append failed for {}: {}", account_id, e);
        }
    }
}
