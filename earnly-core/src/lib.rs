//! Earnly reward ledger
//!
//! This crate holds the server-side core of a task-and-reward platform: users earn a withdrawable
//! primary balance and in-app points by completing admin-posted tasks, playing mini-games and
//! inviting others, then convert points and request payouts that administrators settle.
//!
//! Features:
//! - Atomic two-currency ledger with an exact points conversion rule
//! - Proof-based task verification with a single terminal review
//! - Withdrawals reserved by debit and refunded on rejection
//! - Referral bonuses, daily bonus and ad-gated mini-games
//! - Administrative audit log and ledger journal

use rust_decimal::Decimal;
use std::sync::Arc;

pub mod admin;
pub mod config;
pub mod engagement;
pub mod error;
pub mod games;
pub mod ledger;
pub mod referral;
pub mod store;
pub mod tasks;
pub mod types;
pub mod withdrawal;

pub use config::EarnlyConfig;
pub use error::{RewardError, RewardErrorCategory, RewardResult};
pub use types::*;

use admin::{AdminConsole, AdminDashboard};
use engagement::{
    AdKind, EngagementGate, MemoryProofStorage, NoQuestions, ProofStorage, QuestionSource, QuizPrompt,
};
use games::{Arcade, GameOutcome};
use ledger::{Conversion, Ledger};
use referral::{AccountRegistry, SignIn};
use store::RewardStore;
use tasks::TaskPipeline;
use withdrawal::WithdrawalDesk;

/// Entry point wiring every workflow over one store
#[derive(Debug, Clone)]
pub struct EarnlyService {
    /// Service configuration
    config: EarnlyConfig,
    /// Durable store shared by all components
    store: Arc<dyn RewardStore>,
    ledger: Ledger,
    registry: AccountRegistry,
    tasks: TaskPipeline,
    withdrawals: WithdrawalDesk,
    admin: AdminConsole,
    arcade: Arcade,
    gate: Arc<dyn EngagementGate>,
    questions: Arc<dyn QuestionSource>,
    proofs: Arc<dyn ProofStorage>,
}

impl EarnlyService {
    /// Create a service. Quiz questions fall back to the fixed question and proofs are kept in
    /// memory until [`with_questions`](Self::with_questions) or
    /// [`with_proof_storage`](Self::with_proof_storage) replace them.
    pub fn new(
        config: EarnlyConfig,
        store: Arc<dyn RewardStore>,
        gate: Arc<dyn EngagementGate>,
    ) -> RewardResult<Self> {
        config.validate()?;
        Ok(Self::assemble(
            config,
            store,
            gate,
            Arc::new(NoQuestions),
            Arc::new(MemoryProofStorage::new()),
        ))
    }

    /// Use a different quiz question source
    pub fn with_questions(self, questions: Arc<dyn QuestionSource>) -> Self {
        Self::assemble(self.config, self.store, self.gate, questions, self.proofs)
    }

    /// Use a different proof storage backend
    pub fn with_proof_storage(self, proofs: Arc<dyn ProofStorage>) -> Self {
        Self::assemble(self.config, self.store, self.gate, self.questions, proofs)
    }

    fn assemble(
        config: EarnlyConfig,
        store: Arc<dyn RewardStore>,
        gate: Arc<dyn EngagementGate>,
        questions: Arc<dyn QuestionSource>,
        proofs: Arc<dyn ProofStorage>,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        let registry = AccountRegistry::new(store.clone(), ledger.clone(), config.signup.clone());
        let tasks = TaskPipeline::new(store.clone(), ledger.clone());
        let withdrawals = WithdrawalDesk::new(store.clone(), ledger.clone());
        let admin = AdminConsole::new(store.clone());
        let arcade = Arcade::new(
            store.clone(),
            ledger.clone(),
            gate.clone(),
            questions.clone(),
            config.rewards.clone(),
        );

        Self {
            config,
            store,
            ledger,
            registry,
            tasks,
            withdrawals,
            admin,
            arcade,
            gate,
            questions,
            proofs,
        }
    }

    /// Service configuration
    pub fn config(&self) -> &EarnlyConfig {
        &self.config
    }

    /// Ledger handle
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Current admin settings
    pub async fn settings(&self) -> RewardResult<AdminSettings> {
        self.store.settings().await
    }

    // Accounts

    /// Resolve or create the account behind a verified session
    pub async fn sign_in(
        &self,
        session: &VerifiedSession,
        name: &str,
        referral_code: Option<&str>,
    ) -> RewardResult<SignIn> {
        let settings = self.store.settings().await?;
        self.registry
            .sign_in(session, name, referral_code, &settings)
            .await
    }

    /// Fetch an account
    pub async fn account(&self, account_id: &str) -> RewardResult<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| RewardError::not_found("account", account_id))
    }

    /// Current balances
    pub async fn balances(&self, account_id: &str) -> RewardResult<Balances> {
        self.ledger.balances(account_id).await
    }

    /// Ledger journal of an account, oldest first
    pub async fn ledger_history(&self, account_id: &str) -> RewardResult<Vec<LedgerEntry>> {
        self.ledger.history(account_id).await
    }

    /// Convert whole batches of points into primary currency
    pub async fn convert_points(&self, account_id: &str) -> RewardResult<Option<Conversion>> {
        self.ledger.convert_points(account_id).await
    }

    // Tasks

    /// Post a task
    pub async fn create_task(&self, actor: &str, task: NewTask) -> RewardResult<Task> {
        self.tasks.create_task(actor, task).await
    }

    /// Flip a task between active and inactive
    pub async fn toggle_task_status(&self, actor: &str, task_id: &str) -> RewardResult<Task> {
        self.tasks.toggle_task_status(actor, task_id).await
    }

    /// Every task, newest first
    pub async fn tasks(&self) -> RewardResult<Vec<Task>> {
        self.tasks.tasks().await
    }

    /// Tasks with this account's submission status
    pub async fn tasks_for(&self, account_id: &str) -> RewardResult<Vec<TaskView>> {
        self.tasks.tasks_for(account_id).await
    }

    /// Submit an already stored proof
    pub async fn submit_proof(
        &self,
        account_id: &str,
        task_id: &str,
        proof: ProofRef,
    ) -> RewardResult<TaskCompletion> {
        self.tasks.submit_proof(account_id, task_id, proof).await
    }

    /// Upload proof bytes and submit them, then show an interstitial ad.
    ///
    /// The interstitial is not a gate: the submission stands whatever its outcome.
    pub async fn upload_proof(
        &self,
        account_id: &str,
        task_id: &str,
        bytes: Vec<u8>,
    ) -> RewardResult<TaskCompletion> {
        let proof = self.proofs.upload(account_id, task_id, bytes).await?;
        let completion = self.tasks.submit_proof(account_id, task_id, proof).await?;
        match self.gate.confirm(account_id, AdKind::Interstitial).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Interstitial skipped by {}", account_id),
            Err(e) => tracing::warn!("Interstitial after upload failed for {}: {}", account_id, e),
        }
        Ok(completion)
    }

    /// Approve or reject a pending submission
    pub async fn review_proof(
        &self,
        actor: &str,
        completion_id: &str,
        decision: ReviewDecision,
    ) -> RewardResult<TaskCompletion> {
        self.tasks.review_proof(actor, completion_id, decision).await
    }

    /// Submissions awaiting review
    pub async fn pending_reviews(&self, actor: &str) -> RewardResult<Vec<TaskCompletion>> {
        self.tasks.pending_reviews(actor).await
    }

    /// An account's own submissions
    pub async fn completions_for(&self, account_id: &str) -> RewardResult<Vec<TaskCompletion>> {
        self.tasks.completions_for(account_id).await
    }

    // Withdrawals

    /// Fee breakdown under the current settings
    pub async fn quote_withdrawal(&self, amount: Decimal) -> RewardResult<WithdrawalQuote> {
        let settings = self.store.settings().await?;
        withdrawal::quote(amount, &settings)
    }

    /// Request a payout
    pub async fn request_withdrawal(
        &self,
        account_id: &str,
        amount: Decimal,
        details: PayoutDetails,
    ) -> RewardResult<WithdrawalRequest> {
        let settings = self.store.settings().await?;
        self.withdrawals
            .request_withdrawal(account_id, amount, details, &settings)
            .await
    }

    /// Settle a pending payout
    pub async fn decide_withdrawal(
        &self,
        actor: &str,
        withdrawal_id: &str,
        action: WithdrawalAction,
    ) -> RewardResult<WithdrawalRequest> {
        self.withdrawals.decide(actor, withdrawal_id, action).await
    }

    /// Payouts awaiting a decision
    pub async fn pending_withdrawals(&self, actor: &str) -> RewardResult<Vec<WithdrawalRequest>> {
        self.withdrawals.pending(actor).await
    }

    /// An account's own payouts, newest first
    pub async fn withdrawals_for(&self, account_id: &str) -> RewardResult<Vec<WithdrawalRequest>> {
        self.withdrawals.history(account_id).await
    }

    // Engagement

    /// Claim today's bonus
    pub async fn claim_daily_bonus(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.arcade.claim_daily_bonus(account_id).await
    }

    /// Reward a watched ad
    pub async fn watch_rewarded_ad(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.arcade.watch_rewarded_ad(account_id).await
    }

    /// Spin the wheel
    pub async fn spin(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.arcade.spin(account_id).await
    }

    /// Scratch a card
    pub async fn scratch(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.arcade.scratch(account_id).await
    }

    /// Next quiz question
    pub async fn next_quiz(&self) -> QuizPrompt {
        self.arcade.next_quiz().await
    }

    /// Answer a quiz question
    pub async fn answer_quiz(
        &self,
        account_id: &str,
        prompt: &QuizPrompt,
        choice: usize,
    ) -> RewardResult<GameOutcome> {
        self.arcade.answer_quiz(account_id, prompt, choice).await
    }

    // Administration

    /// Block or unblock an account
    pub async fn set_blocked(
        &self,
        actor: &str,
        account_id: &str,
        blocked: bool,
    ) -> RewardResult<Account> {
        self.admin.set_blocked(actor, account_id, blocked).await
    }

    /// Replace the admin settings
    pub async fn update_settings(
        &self,
        actor: &str,
        settings: AdminSettings,
    ) -> RewardResult<AdminSettings> {
        self.admin.update_settings(actor, settings).await
    }

    /// All accounts
    pub async fn accounts(&self, actor: &str) -> RewardResult<Vec<Account>> {
        self.admin.accounts(actor).await
    }

    /// Administrative audit log
    pub async fn audit_log(&self, actor: &str) -> RewardResult<Vec<AdminLogEntry>> {
        self.admin.audit_log(actor).await
    }

    /// Dashboard counters
    pub async fn dashboard(&self, actor: &str) -> RewardResult<AdminDashboard> {
        self.admin.dashboard(actor).await
    }
}
