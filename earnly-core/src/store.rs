//! Durable store contract and the in-process implementation
//!
//! Every mutation goes through a conditional update: the store hands the closure a copy of the
//! current record, and the copy replaces the stored record only if the closure succeeds. Account
//! updates lock a single account, so mutations on different accounts never wait on each other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::{
    Account, AccountId, AdminLogEntry, AdminSettings, CompletionId, LedgerEntry, RewardError,
    RewardResult, Task, TaskCompletion, TaskId, WithdrawalId, WithdrawalRequest,
};

/// Mutation applied to a copy of a stored record
pub type RecordUpdate<'a, T> = Box<dyn FnOnce(&mut T) -> RewardResult<()> + Send + 'a>;

/// Builds the completion for an (account, task) pair from the existing one, if any
pub type CompletionUpsert<'a> =
    Box<dyn FnOnce(Option<&TaskCompletion>) -> RewardResult<TaskCompletion> + Send + 'a>;

/// Persistence collaborator for all reward records
#[async_trait]
pub trait RewardStore: Send + Sync + std::fmt::Debug {
    /// Insert a new account; fails if the id or referral code is taken
    async fn insert_account(&self, account: Account) -> RewardResult<()>;

    /// Get account by id
    async fn get_account(&self, id: &str) -> RewardResult<Option<Account>>;

    /// Look up the account owning a referral code
    async fn find_account_by_referral_code(&self, code: &str) -> RewardResult<Option<Account>>;

    /// List all accounts
    async fn list_accounts(&self) -> RewardResult<Vec<Account>>;

    /// Atomically read-modify-write one account
    async fn update_account(
        &self,
        id: &str,
        update: RecordUpdate<'_, Account>,
    ) -> RewardResult<Account>;

    /// Insert a new task
    async fn insert_task(&self, task: Task) -> RewardResult<()>;

    /// Get task by id
    async fn get_task(&self, id: &str) -> RewardResult<Option<Task>>;

    /// List tasks, newest first
    async fn list_tasks(&self) -> RewardResult<Vec<Task>>;

    /// Atomically read-modify-write one task
    async fn update_task(&self, id: &str, update: RecordUpdate<'_, Task>) -> RewardResult<Task>;

    /// Create or overwrite the completion for an (account, task) pair in one step
    async fn upsert_completion(
        &self,
        account_id: &str,
        task_id: &str,
        upsert: CompletionUpsert<'_>,
    ) -> RewardResult<TaskCompletion>;

    /// Get completion by id
    async fn get_completion(&self, id: &str) -> RewardResult<Option<TaskCompletion>>;

    /// List completions, newest first, optionally for one account
    async fn list_completions(&self, account_id: Option<&str>) -> RewardResult<Vec<TaskCompletion>>;

    /// Atomically read-modify-write one completion
    async fn update_completion(
        &self,
        id: &str,
        update: RecordUpdate<'_, TaskCompletion>,
    ) -> RewardResult<TaskCompletion>;

    /// Insert a new withdrawal request
    async fn insert_withdrawal(&self, request: WithdrawalRequest) -> RewardResult<()>;

    /// Get withdrawal request by id
    async fn get_withdrawal(&self, id: &str) -> RewardResult<Option<WithdrawalRequest>>;

    /// List withdrawal requests, newest first, optionally for one account
    async fn list_withdrawals(&self, account_id: Option<&str>)
        -> RewardResult<Vec<WithdrawalRequest>>;

    /// Atomically read-modify-write one withdrawal request
    async fn update_withdrawal(
        &self,
        id: &str,
        update: RecordUpdate<'_, WithdrawalRequest>,
    ) -> RewardResult<WithdrawalRequest>;

    /// Append to the administrative audit log
    async fn append_admin_log(&self, entry: AdminLogEntry) -> RewardResult<()>;

    /// Read the administrative audit log, oldest first
    async fn list_admin_log(&self) -> RewardResult<Vec<AdminLogEntry>>;

    /// Append to the ledger journal
    async fn append_ledger_entry(&self, entry: LedgerEntry) -> RewardResult<()>;

    /// Journal lines for one account, oldest first
    async fn list_ledger_entries(&self, account_id: &str) -> RewardResult<Vec<LedgerEntry>>;

    /// Current admin settings
    async fn settings(&self) -> RewardResult<AdminSettings>;

    /// Replace admin settings
    async fn put_settings(&self, settings: AdminSettings) -> RewardResult<()>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
    referral_codes: RwLock<HashMap<String, AccountId>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    completions: RwLock<HashMap<CompletionId, TaskCompletion>>,
    completion_index: RwLock<HashMap<(AccountId, TaskId), CompletionId>>,
    withdrawals: RwLock<HashMap<WithdrawalId, WithdrawalRequest>>,
    admin_log: RwLock<Vec<AdminLogEntry>>,
    ledger: RwLock<Vec<LedgerEntry>>,
    settings: RwLock<AdminSettings>,
}

/// Serializable copy of every collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub settings: AdminSettings,
    pub accounts: Vec<Account>,
    pub tasks: Vec<Task>,
    pub completions: Vec<TaskCompletion>,
    pub withdrawals: Vec<WithdrawalRequest>,
    pub admin_log: Vec<AdminLogEntry>,
    pub ledger: Vec<LedgerEntry>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(settings: AdminSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            ..Self::default()
        }
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let referral_codes = snapshot
            .accounts
            .iter()
            .map(|a| (a.referral_code.clone(), a.id.clone()))
            .collect();
        let accounts = snapshot
            .accounts
            .into_iter()
            .map(|a| (a.id.clone(), Arc::new(Mutex::new(a))))
            .collect();
        let completion_index = snapshot
            .completions
            .iter()
            .map(|c| ((c.account_id.clone(), c.task_id.clone()), c.id.clone()))
            .collect();

        Self {
            accounts: RwLock::new(accounts),
            referral_codes: RwLock::new(referral_codes),
            tasks: RwLock::new(snapshot.tasks.into_iter().map(|t| (t.id.clone(), t)).collect()),
            completions: RwLock::new(
                snapshot.completions.into_iter().map(|c| (c.id.clone(), c)).collect(),
            ),
            completion_index: RwLock::new(completion_index),
            withdrawals: RwLock::new(
                snapshot.withdrawals.into_iter().map(|w| (w.id.clone(), w)).collect(),
            ),
            admin_log: RwLock::new(snapshot.admin_log),
            ledger: RwLock::new(snapshot.ledger),
            settings: RwLock::new(snapshot.settings),
        }
    }

    /// Copy every collection out
    pub async fn snapshot(&self) -> StoreSnapshot {
        let handles: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut accounts = Vec::with_capacity(handles.len());
        for handle in handles {
            accounts.push(handle.lock().await.clone());
        }
        accounts.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.posted_at.cmp(&b.posted_at));
        let mut completions: Vec<_> = self.completions.read().await.values().cloned().collect();
        completions.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        let mut withdrawals: Vec<_> = self.withdrawals.read().await.values().cloned().collect();
        withdrawals.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));

        StoreSnapshot {
            settings: self.settings.read().await.clone(),
            accounts,
            tasks,
            completions,
            withdrawals,
            admin_log: self.admin_log.read().await.clone(),
            ledger: self.ledger.read().await.clone(),
        }
    }

    async fn account_handle(&self, id: &str) -> Option<Arc<Mutex<Account>>> {
        self.accounts.read().await.get(id).cloned()
    }
}

fn apply_update<T: Clone>(record: &mut T, update: RecordUpdate<'_, T>) -> RewardResult<T> {
    let mut draft = record.clone();
    update(&mut draft)?;
    *record = draft.clone();
    Ok(draft)
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn insert_account(&self, account: Account) -> RewardResult<()> {
        let mut accounts = self.accounts.write().await;
        let mut codes = self.referral_codes.write().await;
        if accounts.contains_key(&account.id) {
            return Err(RewardError::AccountExists(account.id));
        }
        if codes.contains_key(&account.referral_code) {
            return Err(RewardError::AccountExists(format!(
                "referral code {}",
                account.referral_code
            )));
        }
        codes.insert(account.referral_code.clone(), account.id.clone());
        accounts.insert(account.id.clone(), Arc::new(Mutex::new(account)));
        Ok(())
    }

    async fn get_account(&self, id: &str) -> RewardResult<Option<Account>> {
        match self.account_handle(id).await {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_account_by_referral_code(&self, code: &str) -> RewardResult<Option<Account>> {
        let id = self.referral_codes.read().await.get(code).cloned();
        match id {
            Some(id) => self.get_account(&id).await,
            None => Ok(None),
        }
    }

    async fn list_accounts(&self) -> RewardResult<Vec<Account>> {
        let handles: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut accounts = Vec::with_capacity(handles.len());
        for handle in handles {
            accounts.push(handle.lock().await.clone());
        }
        accounts.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(accounts)
    }

    async fn update_account(
        &self,
        id: &str,
        update: RecordUpdate<'_, Account>,
    ) -> RewardResult<Account> {
        let handle = self
            .account_handle(id)
            .await
            .ok_or_else(|| RewardError::not_found("account", id))?;
        let mut account = handle.lock().await;
        apply_update(&mut *account, update)
    }

    async fn insert_task(&self, task: Task) -> RewardResult<()> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> RewardResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list_tasks(&self) -> RewardResult<Vec<Task>> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(tasks)
    }

    async fn update_task(&self, id: &str, update: RecordUpdate<'_, Task>) -> RewardResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| RewardError::not_found("task", id))?;
        apply_update(task, update)
    }

    async fn upsert_completion(
        &self,
        account_id: &str,
        task_id: &str,
        upsert: CompletionUpsert<'_>,
    ) -> RewardResult<TaskCompletion> {
        let mut index = self.completion_index.write().await;
        let mut completions = self.completions.write().await;
        let key = (account_id.to_string(), task_id.to_string());

        let existing = index.get(&key).and_then(|id| completions.get(id));
        let completion = upsert(existing)?;

        index.insert(key, completion.id.clone());
        completions.insert(completion.id.clone(), completion.clone());
        Ok(completion)
    }

    async fn get_completion(&self, id: &str) -> RewardResult<Option<TaskCompletion>> {
        Ok(self.completions.read().await.get(id).cloned())
    }

    async fn list_completions(&self, account_id: Option<&str>) -> RewardResult<Vec<TaskCompletion>> {
        let mut completions: Vec<_> = self
            .completions
            .read()
            .await
            .values()
            .filter(|c| account_id.map_or(true, |id| c.account_id == id))
            .cloned()
            .collect();
        completions.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(completions)
    }

    async fn update_completion(
        &self,
        id: &str,
        update: RecordUpdate<'_, TaskCompletion>,
    ) -> RewardResult<TaskCompletion> {
        let mut completions = self.completions.write().await;
        let completion = completions
            .get_mut(id)
            .ok_or_else(|| RewardError::not_found("completion", id))?;
        apply_update(completion, update)
    }

    async fn insert_withdrawal(&self, request: WithdrawalRequest) -> RewardResult<()> {
        self.withdrawals.write().await.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_withdrawal(&self, id: &str) -> RewardResult<Option<WithdrawalRequest>> {
        Ok(self.withdrawals.read().await.get(id).cloned())
    }

    async fn list_withdrawals(
        &self,
        account_id: Option<&str>,
    ) -> RewardResult<Vec<WithdrawalRequest>> {
        let mut withdrawals: Vec<_> = self
            .withdrawals
            .read()
            .await
            .values()
            .filter(|w| account_id.map_or(true, |id| w.account_id == id))
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(withdrawals)
    }

    async fn update_withdrawal(
        &self,
        id: &str,
        update: RecordUpdate<'_, WithdrawalRequest>,
    ) -> RewardResult<WithdrawalRequest> {
        let mut withdrawals = self.withdrawals.write().await;
        let request = withdrawals
            .get_mut(id)
            .ok_or_else(|| RewardError::not_found("withdrawal", id))?;
        apply_update(request, update)
    }

    async fn append_admin_log(&self, entry: AdminLogEntry) -> RewardResult<()> {
        self.admin_log.write().await.push(entry);
        Ok(())
    }

    async fn list_admin_log(&self) -> RewardResult<Vec<AdminLogEntry>> {
        Ok(self.admin_log.read().await.clone())
    }

    async fn append_ledger_entry(&self, entry: LedgerEntry) -> RewardResult<()> {
        self.ledger.write().await.push(entry);
        Ok(())
    }

    async fn list_ledger_entries(&self, account_id: &str) -> RewardResult<Vec<LedgerEntry>> {
        Ok(self
            .ledger
            .read()
            .await
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn settings(&self) -> RewardResult<AdminSettings> {
        Ok(self.settings.read().await.clone())
    }

    async fn put_settings(&self, settings: AdminSettings) -> RewardResult<()> {
        *self.settings.write().await = settings;
        Ok(())
    }
}

impl StoreSnapshot {
    /// Load a snapshot from a JSON file
    pub fn load_from_file(path: &Path) -> RewardResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RewardError::StorageUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the snapshot as pretty JSON, replacing the file in one rename
    pub fn save_to_file(&self, path: &Path) -> RewardResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, content)
            .and_then(|()| std::fs::rename(&staging, path))
            .map_err(|e| {
                RewardError::StorageUnavailable(format!("cannot write {}: {e}", path.display()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn account(id: &str, code: &str) -> Account {
        Account {
            id: id.to_string(),
            name: "Asha".to_string(),
            mobile: "9000000001".to_string(),
            balance: dec!(10),
            points: 500,
            completed_tasks: 0,
            is_admin: false,
            is_blocked: false,
            referral_code: code.to_string(),
            referred_by: None,
            referral_count: 0,
            referral_income: dec!(0),
            joined_at: Utc::now(),
            last_daily_bonus: None,
        }
    }

    #[tokio::test]
    async fn test_account_uniqueness() {
        let store = MemoryStore::default();
        store.insert_account(account("u1", "ASH123")).await.unwrap();

        let duplicate_id = store.insert_account(account("u1", "ASH999")).await;
        assert!(matches!(duplicate_id, Err(RewardError::AccountExists(_))));

        let duplicate_code = store.insert_account(account("u2", "ASH123")).await;
        assert!(matches!(duplicate_code, Err(RewardError::AccountExists(_))));

        let found = store.find_account_by_referral_code("ASH123").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
    }

    #[tokio::test]
    async fn test_failed_update_leaves_record_untouched() {
        let store = MemoryStore::default();
        store.insert_account(account("u1", "ASH123")).await.unwrap();

        let result = store
            .update_account(
                "u1",
                Box::new(|a: &mut Account| {
                    a.points = 0;
                    Err(RewardError::InvalidAmount("rejected".to_string()))
                }),
            )
            .await;
        assert!(result.is_err());

        let stored = store.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.points, 500);

        let missing = store.update_account("nobody", Box::new(|_: &mut Account| Ok(()))).await;
        assert!(matches!(missing, Err(RewardError::NotFound { kind: "account", .. })));
    }

    #[tokio::test]
    async fn test_snapshot_file_operations() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        let store = MemoryStore::new(AdminSettings::default());
        store.insert_account(account("u1", "ASH123")).await.unwrap();
        store.snapshot().await.save_to_file(&path).unwrap();

        let restored = MemoryStore::from_snapshot(StoreSnapshot::load_from_file(&path).unwrap());
        let account = restored.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(10));
        assert!(restored.find_account_by_referral_code("ASH123").await.unwrap().is_some());

        let missing = StoreSnapshot::load_from_file(&temp_dir.path().join("absent.json"));
        assert!(matches!(missing, Err(RewardError::StorageUnavailable(_))));
    }
}
