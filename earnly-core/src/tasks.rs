//! Sponsored tasks and the proof verification pipeline
//!
//! A completion moves `pending -> approved | rejected`; a rejected completion may be submitted
//! again, an approved one is final. Rewards are credited only when an admin approves.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::admin::{require_admin, AuditLog};
use crate::ledger::{BalanceDelta, Ledger};
use crate::store::RewardStore;
use crate::{
    Account, AdminAction, CompletionStatus, EntryReason, NewTask, ProofRef, ReviewDecision,
    RewardError, RewardResult, Task, TaskCompletion, TaskStatus, TaskView,
};

/// Task catalogue and proof review
#[derive(Debug, Clone)]
pub struct TaskPipeline {
    store: Arc<dyn RewardStore>,
    ledger: Ledger,
    audit: AuditLog,
}

impl TaskPipeline {
    /// Create a pipeline over a store
    pub fn new(store: Arc<dyn RewardStore>, ledger: Ledger) -> Self {
        let audit = AuditLog::new(store.clone());
        Self {
            store,
            ledger,
            audit,
        }
    }

    /// Publish a new active task
    pub async fn create_task(&self, actor: &str, new_task: NewTask) -> RewardResult<Task> {
        require_admin(self.store.as_ref(), actor).await?;
        if new_task.title.trim().is_empty() {
            return Err(RewardError::InvalidTask("title is required".to_string()));
        }
        new_task.reward.validate()?;

        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: new_task.title,
            description: new_task.description,
            link: new_task.link,
            reward: new_task.reward,
            logo: new_task.logo,
            status: TaskStatus::Active,
            posted_at: Utc::now(),
        };
        self.store.insert_task(task.clone()).await?;

        tracing::info!("Task {} ({}) added by {}", task.id, task.title, actor);
        self.audit
            .record(actor, AdminAction::AddTask, &task.id, format!("Added task: {}", task.title))
            .await;
        Ok(task)
    }

    /// Flip a task between active and inactive
    pub async fn toggle_task_status(&self, actor: &str, task_id: &str) -> RewardResult<Task> {
        require_admin(self.store.as_ref(), actor).await?;

        let task = self
            .store
            .update_task(
                task_id,
                Box::new(|task: &mut Task| {
                    task.status = task.status.toggled();
                    Ok(())
                }),
            )
            .await?;

        tracing::info!("Task {} is now {:?}", task_id, task.status);
        self.audit
            .record(
                actor,
                AdminAction::ToggleTask,
                task_id,
                format!("Task {} set to {:?}", task.title, task.status),
            )
            .await;
        Ok(task)
    }

    /// Every task, newest first
    pub async fn tasks(&self) -> RewardResult<Vec<Task>> {
        self.store.list_tasks().await
    }

    /// Tasks annotated with one account's submission status
    pub async fn tasks_for(&self, account_id: &str) -> RewardResult<Vec<TaskView>> {
        let submissions: HashMap<_, _> = self
            .store
            .list_completions(Some(account_id))
            .await?
            .into_iter()
            .map(|c| (c.task_id, c.status))
            .collect();

        Ok(self
            .store
            .list_tasks()
            .await?
            .into_iter()
            .map(|task| {
                let submission = submissions.get(&task.id).copied();
                TaskView { task, submission }
            })
            .collect())
    }

    /// Submit proof that an account completed a task. No reward moves until review.
    pub async fn submit_proof(
        &self,
        account_id: &str,
        task_id: &str,
        proof: ProofRef,
    ) -> RewardResult<TaskCompletion> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| RewardError::not_found("account", account_id))?;
        account.ensure_active()?;

        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| RewardError::not_found("task", task_id))?;
        if task.status == TaskStatus::Inactive {
            return Err(RewardError::TaskInactive(task_id.to_string()));
        }

        let completion = self
            .store
            .upsert_completion(
                account_id,
                task_id,
                Box::new(|existing: Option<&TaskCompletion>| {
                    let id = match existing {
                        Some(prior) if prior.status == CompletionStatus::Rejected => prior.id.clone(),
                        Some(prior) => {
                            return Err(RewardError::DuplicateSubmission {
                                task: task_id.to_string(),
                                status: prior.status.to_string(),
                            })
                        }
                        None => Uuid::new_v4().to_string(),
                    };
                    Ok(TaskCompletion {
                        id,
                        account_id: account_id.to_string(),
                        task_id: task_id.to_string(),
                        proof,
                        status: CompletionStatus::Pending,
                        submitted_at: Utc::now(),
                        reviewed_at: None,
                    })
                }),
            )
            .await?;

        tracing::info!(
            "Proof submitted by {} for task {} ({})",
            account_id,
            task_id,
            completion.id
        );
        Ok(completion)
    }

    /// Approve or reject a pending completion.
    ///
    /// The status flips first so that only one reviewer wins; if the reward credit then fails,
    /// the completion goes back to pending and the error is returned.
    pub async fn review_proof(
        &self,
        actor: &str,
        completion_id: &str,
        decision: ReviewDecision,
    ) -> RewardResult<TaskCompletion> {
        require_admin(self.store.as_ref(), actor).await?;

        let completion = self
            .store
            .get_completion(completion_id)
            .await?
            .ok_or_else(|| RewardError::not_found("completion", completion_id))?;
        let task = self
            .store
            .get_task(&completion.task_id)
            .await?
            .ok_or_else(|| RewardError::not_found("task", completion.task_id.clone()))?;
        let credit = BalanceDelta::reward(&task.reward)?;

        let status = match decision {
            ReviewDecision::Approve => CompletionStatus::Approved,
            ReviewDecision::Reject => CompletionStatus::Rejected,
        };
        let reviewed = self
            .store
            .update_completion(
                completion_id,
                Box::new(move |completion: &mut TaskCompletion| {
                    if completion.status.is_terminal() {
                        return Err(RewardError::AlreadyReviewed(completion.id.clone()));
                    }
                    completion.status = status;
                    completion.reviewed_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;

        if decision == ReviewDecision::Approve {
            let credited = self
                .ledger
                .apply_delta_with(
                    &reviewed.account_id,
                    credit,
                    EntryReason::TaskReward {
                        task_id: task.id.clone(),
                    },
                    |account: &mut Account| {
                        account.completed_tasks = account.completed_tasks.saturating_add(1);
                        Ok(())
                    },
                )
                .await;

            if let Err(e) = credited {
                tracing::warn!(
                    "Reward credit for completion {} failed, reopening it: {}",
                    completion_id,
                    e
                );
                if let Err(reopen_error) = self.reopen(completion_id).await {
                    tracing::error!(
                        "Completion {} stays approved without its reward: {}",
                        completion_id,
                        reopen_error
                    );
                }
                return Err(e);
            }
        }

        let action = match decision {
            ReviewDecision::Approve => AdminAction::ApproveProof,
            ReviewDecision::Reject => AdminAction::RejectProof,
        };
        tracing::info!(
            "Completion {} of task {} {} by {}",
            completion_id,
            task.id,
            reviewed.status,
            actor
        );
        self.audit
            .record(
                actor,
                action,
                completion_id,
                format!("Proof for {} by {} {}", task.title, reviewed.account_id, reviewed.status),
            )
            .await;
        Ok(reviewed)
    }

    /// Completions awaiting review, newest first
    pub async fn pending_reviews(&self, actor: &str) -> RewardResult<Vec<TaskCompletion>> {
        require_admin(self.store.as_ref(), actor).await?;
        Ok(self
            .store
            .list_completions(None)
            .await?
            .into_iter()
            .filter(|c| c.status == CompletionStatus::Pending)
            .collect())
    }

    /// One account's completions, newest first
    pub async fn completions_for(&self, account_id: &str) -> RewardResult<Vec<TaskCompletion>> {
        self.store.list_completions(Some(account_id)).await
    }

    async fn reopen(&self, completion_id: &str) -> RewardResult<()> {
        self.store
            .update_completion(
                completion_id,
                Box::new(|completion: &mut TaskCompletion| {
                    completion.status = CompletionStatus::Pending;
                    completion.reviewed_at = None;
                    Ok(())
                }),
            )
            .await
            .map(|_| ())
    }
}
