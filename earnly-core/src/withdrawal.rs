//! Withdrawal requests: debit on request, refund on rejection

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::admin::{require_admin, AuditLog};
use crate::ledger::{BalanceDelta, Ledger};
use crate::store::RewardStore;
use crate::{
    AdminAction, AdminSettings, EntryReason, PayoutDetails, RewardError, RewardResult,
    WithdrawalAction, WithdrawalQuote, WithdrawalRequest, WithdrawalStatus,
};

/// Fee breakdown for display. The fee is informational; the full amount is debited.
pub fn quote(amount: Decimal, settings: &AdminSettings) -> RewardResult<WithdrawalQuote> {
    let out_of_range =
        || RewardError::InvalidAmount(format!("withdrawal amount {amount} is out of range"));
    let fee = amount
        .checked_mul(settings.platform_fee_percent)
        .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(out_of_range)?
        .round_dp(2);
    let payable = amount.checked_sub(fee).ok_or_else(out_of_range)?;
    Ok(WithdrawalQuote {
        amount,
        fee,
        payable,
    })
}

/// Payout request intake and admin settlement
#[derive(Debug, Clone)]
pub struct WithdrawalDesk {
    store: Arc<dyn RewardStore>,
    ledger: Ledger,
    audit: AuditLog,
}

impl WithdrawalDesk {
    /// Create a withdrawal desk over a store
    pub fn new(store: Arc<dyn RewardStore>, ledger: Ledger) -> Self {
        let audit = AuditLog::new(store.clone());
        Self {
            store,
            ledger,
            audit,
        }
    }

    /// Reserve `amount` by debiting it now and open a pending request
    pub async fn request_withdrawal(
        &self,
        account_id: &str,
        amount: Decimal,
        details: PayoutDetails,
        settings: &AdminSettings,
    ) -> RewardResult<WithdrawalRequest> {
        if amount <= Decimal::ZERO {
            return Err(RewardError::InvalidAmount(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }
        if amount < settings.min_withdraw {
            return Err(RewardError::BelowMinimum {
                amount,
                minimum: settings.min_withdraw,
            });
        }

        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| RewardError::not_found("account", account_id))?;
        account.ensure_active()?;

        let request = WithdrawalRequest {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            account_name: account.name.clone(),
            account_mobile: account.mobile.clone(),
            amount,
            method: details.method(),
            destination: details.destination(),
            status: WithdrawalStatus::Pending,
            requested_at: Utc::now(),
            decided_at: None,
        };

        self.ledger
            .apply_delta(
                account_id,
                BalanceDelta::primary(-amount),
                EntryReason::WithdrawalDebit {
                    withdrawal_id: request.id.clone(),
                },
            )
            .await?;

        if let Err(e) = self.store.insert_withdrawal(request.clone()).await {
            tracing::warn!(
                "Could not record withdrawal {} for {}, refunding: {}",
                request.id,
                account_id,
                e
            );
            if let Err(refund_error) = self.refund(&request).await {
                tracing::error!(
                    "Refund of {} for unrecorded withdrawal {} failed, {} stays debited: {}",
                    amount,
                    request.id,
                    account_id,
                    refund_error
                );
            }
            return Err(e);
        }

        tracing::info!(
            "Withdrawal {} of {} via {} requested by {}",
            request.id,
            amount,
            request.method,
            account_id
        );
        Ok(request)
    }

    /// Settle a pending request. Approval keeps the debit; rejection refunds it.
    pub async fn decide(
        &self,
        actor: &str,
        withdrawal_id: &str,
        action: WithdrawalAction,
    ) -> RewardResult<WithdrawalRequest> {
        require_admin(self.store.as_ref(), actor).await?;

        let status = match action {
            WithdrawalAction::Approve => WithdrawalStatus::Approved,
            WithdrawalAction::Reject => WithdrawalStatus::Rejected,
        };
        let decided = self
            .store
            .update_withdrawal(
                withdrawal_id,
                Box::new(move |request: &mut WithdrawalRequest| {
                    if request.status != WithdrawalStatus::Pending {
                        return Err(RewardError::AlreadyDecided(request.id.clone()));
                    }
                    request.status = status;
                    request.decided_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;

        if action == WithdrawalAction::Reject {
            if let Err(e) = self.refund(&decided).await {
                tracing::warn!(
                    "Refund for withdrawal {} failed, returning it to pending: {}",
                    withdrawal_id,
                    e
                );
                if let Err(reopen_error) = self.reopen(withdrawal_id).await {
                    tracing::error!(
                        "Withdrawal {} stays rejected without its refund: {}",
                        withdrawal_id,
                        reopen_error
                    );
                }
                return Err(e);
            }
        }

        let admin_action = match action {
            WithdrawalAction::Approve => AdminAction::Approve,
            WithdrawalAction::Reject => AdminAction::Reject,
        };
        tracing::info!("Withdrawal {} {} by {}", withdrawal_id, decided.status, actor);
        self.audit
            .record(
                actor,
                admin_action,
                withdrawal_id,
                format!("Withdrawal {withdrawal_id} {}", decided.status),
            )
            .await;
        Ok(decided)
    }

    /// Pending requests across all accounts, newest first
    pub async fn pending(&self, actor: &str) -> RewardResult<Vec<WithdrawalRequest>> {
        require_admin(self.store.as_ref(), actor).await?;
        Ok(self
            .store
            .list_withdrawals(None)
            .await?
            .into_iter()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .collect())
    }

    /// One account's requests, newest first
    pub async fn history(&self, account_id: &str) -> RewardResult<Vec<WithdrawalRequest>> {
        self.store.list_withdrawals(Some(account_id)).await
    }

    async fn refund(&self, request: &WithdrawalRequest) -> RewardResult<()> {
        self.ledger
            .refund_withdrawal(&request.account_id, request.amount, &request.id)
            .await
            .map(|_| ())
    }

    async fn reopen(&self, withdrawal_id: &str) -> RewardResult<()> {
        self.store
            .update_withdrawal(
                withdrawal_id,
                Box::new(|request: &mut WithdrawalRequest| {
                    request.status = WithdrawalStatus::Pending;
                    request.decided_at = None;
                    Ok(())
                }),
            )
            .await
            .map(|_| ())
    }
}
