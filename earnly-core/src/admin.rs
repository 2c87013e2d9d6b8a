//! Privileged operations and the administrative audit log

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::RewardStore;
use crate::{
    Account, AdminAction, AdminLogEntry, AdminSettings, CompletionStatus, RewardError,
    RewardResult, TaskStatus, WithdrawalStatus,
};

/// Load the acting account and refuse non-administrators
pub async fn require_admin(store: &dyn RewardStore, actor: &str) -> RewardResult<Account> {
    let account = store
        .get_account(actor)
        .await?
        .ok_or_else(|| RewardError::not_found("account", actor))?;
    if !account.is_admin {
        return Err(RewardError::NotPrivileged(actor.to_string()));
    }
    account.ensure_active()?;
    Ok(account)
}

/// Write-only handle on the audit log
#[derive(Debug, Clone)]
pub struct AuditLog {
    store: Arc<dyn RewardStore>,
}

impl AuditLog {
    /// Create an audit log over a store
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        Self { store }
    }

    /// Append an entry. The action it describes has already been applied, so a failed append
    /// is reported in the logs and not to the caller.
    pub async fn record(&self, admin_id: &str, action: AdminAction, target: &str, details: String) {
        let entry = AdminLogEntry {
            admin_id: admin_id.to_string(),
            action,
            target: target.to_string(),
            details,
            time: Utc::now(),
        };
        if let Err(e) = self.store.append_admin_log(entry).await {
            tracing::warn!("Audit log append failed for {} on {}: {}", action, target, e);
        }
    }
}

/// Headline numbers for the admin dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDashboard {
    pub total_users: usize,
    pub blocked_users: usize,
    pub active_tasks: usize,
    pub pending_proofs: usize,
    pub pending_withdrawals: usize,
    pub pending_withdrawal_amount: Decimal,
}

/// Account moderation and settings
#[derive(Debug, Clone)]
pub struct AdminConsole {
    store: Arc<dyn RewardStore>,
    audit: AuditLog,
}

impl AdminConsole {
    /// Create an admin console over a store
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        let audit = AuditLog::new(store.clone());
        Self { store, audit }
    }

    /// Block or unblock an account
    pub async fn set_blocked(
        &self,
        actor: &str,
        account_id: &str,
        blocked: bool,
    ) -> RewardResult<Account> {
        require_admin(self.store.as_ref(), actor).await?;
        if actor == account_id && blocked {
            return Err(RewardError::NotPrivileged(format!(
                "{actor} cannot block their own account"
            )));
        }

        let account = self
            .store
            .update_account(
                account_id,
                Box::new(move |account: &mut Account| {
                    account.is_blocked = blocked;
                    Ok(())
                }),
            )
            .await?;

        let action = if blocked {
            AdminAction::BlockUser
        } else {
            AdminAction::UnblockUser
        };
        tracing::info!("{} {} by {}", action, account_id, actor);
        self.audit
            .record(actor, action, account_id, format!("User {account_id} {action}"))
            .await;
        Ok(account)
    }

    /// Replace the admin settings after validation
    pub async fn update_settings(
        &self,
        actor: &str,
        settings: AdminSettings,
    ) -> RewardResult<AdminSettings> {
        require_admin(self.store.as_ref(), actor).await?;
        settings.validate()?;

        self.store.put_settings(settings.clone()).await?;
        tracing::info!("Admin settings updated by {}: {:?}", actor, settings);
        self.audit
            .record(
                actor,
                AdminAction::UpdateSettings,
                "settings",
                format!(
                    "min withdraw {}, referral bonus {} / {} points, fee {}%",
                    settings.min_withdraw,
                    settings.referral_bonus_primary,
                    settings.referral_bonus_points,
                    settings.platform_fee_percent
                ),
            )
            .await;
        Ok(settings)
    }

    /// All accounts, newest first
    pub async fn accounts(&self, actor: &str) -> RewardResult<Vec<Account>> {
        require_admin(self.store.as_ref(), actor).await?;
        self.store.list_accounts().await
    }

    /// The audit log, oldest first
    pub async fn audit_log(&self, actor: &str) -> RewardResult<Vec<AdminLogEntry>> {
        require_admin(self.store.as_ref(), actor).await?;
        self.store.list_admin_log().await
    }

    /// Dashboard counters
    pub async fn dashboard(&self, actor: &str) -> RewardResult<AdminDashboard> {
        require_admin(self.store.as_ref(), actor).await?;

        let accounts = self.store.list_accounts().await?;
        let tasks = self.store.list_tasks().await?;
        let completions = self.store.list_completions(None).await?;
        let pending: Vec<_> = self
            .store
            .list_withdrawals(None)
            .await?
            .into_iter()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .collect();

        Ok(AdminDashboard {
            total_users: accounts.len(),
            blocked_users: accounts.iter().filter(|a| a.is_blocked).count(),
            active_tasks: tasks.iter().filter(|t| t.status == TaskStatus::Active).count(),
            pending_proofs: completions
                .iter()
                .filter(|c| c.status == CompletionStatus::Pending)
                .count(),
            pending_withdrawals: pending.len(),
            pending_withdrawal_amount: pending.iter().map(|w| w.amount).sum(),
        })
    }
}
