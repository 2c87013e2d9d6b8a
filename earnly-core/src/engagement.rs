//! Collaborators that sit outside the ledger: ad engagement, proof uploads and quiz questions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{ProofRef, RewardError, RewardResult};

/// Kinds of ad engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdKind {
    Interstitial,
    Rewarded,
}

/// Confirms that an account finished an ad before a reward is granted
#[async_trait]
pub trait EngagementGate: Send + Sync + std::fmt::Debug {
    /// `Ok(false)` means the engagement was abandoned and nothing should be granted
    async fn confirm(&self, account_id: &str, kind: AdKind) -> RewardResult<bool>;
}

/// Gate with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    completed: bool,
}

impl StaticGate {
    /// Gate that always reports a completed engagement
    pub fn completed() -> Self {
        Self { completed: true }
    }

    /// Gate that always reports an abandoned engagement
    pub fn abandoned() -> Self {
        Self { completed: false }
    }
}

#[async_trait]
impl EngagementGate for StaticGate {
    async fn confirm(&self, account_id: &str, kind: AdKind) -> RewardResult<bool> {
        tracing::debug!("{:?} engagement for {}: {}", kind, account_id, self.completed);
        Ok(self.completed)
    }
}

/// Blob storage for task proofs
#[async_trait]
pub trait ProofStorage: Send + Sync + std::fmt::Debug {
    /// Store a proof and return a reference to it
    async fn upload(&self, account_id: &str, task_id: &str, bytes: Vec<u8>)
        -> RewardResult<ProofRef>;
}

/// In-process proof storage
#[derive(Debug, Default)]
pub struct MemoryProofStorage {
    blobs: RwLock<HashMap<ProofRef, Vec<u8>>>,
}

impl MemoryProofStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored proof
    pub async fn get(&self, proof: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(proof).cloned()
    }
}

#[async_trait]
impl ProofStorage for MemoryProofStorage {
    async fn upload(
        &self,
        account_id: &str,
        task_id: &str,
        bytes: Vec<u8>,
    ) -> RewardResult<ProofRef> {
        if bytes.is_empty() {
            return Err(RewardError::InvalidTask(format!(
                "empty proof from {account_id} for task {task_id}"
            )));
        }
        let proof = format!("proofs/{account_id}/{task_id}/{}", Uuid::new_v4());
        self.blobs.write().await.insert(proof.clone(), bytes);
        Ok(proof)
    }
}

/// A multiple-choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriviaQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

impl TriviaQuestion {
    /// Question served when the generator is unavailable
    pub fn fallback() -> Self {
        Self {
            question: "Which planet is known as the Red Planet?".to_string(),
            options: ["Earth", "Mars", "Jupiter", "Venus"]
                .into_iter()
                .map(String::from)
                .collect(),
            correct_index: 1,
        }
    }

    /// Check that the correct index points at an option
    pub fn is_well_formed(&self) -> bool {
        !self.question.trim().is_empty() && self.correct_index < self.options.len()
    }
}

/// A question together with the points it pays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizPrompt {
    pub question: TriviaQuestion,
    pub reward_points: u64,
    /// True when the generator failed and the fixed question was served
    pub fallback: bool,
}

/// Source of generated quiz questions
#[async_trait]
pub trait QuestionSource: Send + Sync + std::fmt::Debug {
    /// Produce the next question
    async fn next_question(&self) -> RewardResult<TriviaQuestion>;
}

/// Source that never produces a question, so the fallback is always served
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQuestions;

#[async_trait]
impl QuestionSource for NoQuestions {
    async fn next_question(&self) -> RewardResult<TriviaQuestion> {
        Err(RewardError::StorageUnavailable(
            "no question generator configured".to_string(),
        ))
    }
}

/// Source cycling through a fixed list
#[derive(Debug, Default)]
pub struct QuestionBank {
    questions: Vec<TriviaQuestion>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl QuestionBank {
    /// Create a bank from a list of questions
    pub fn new(questions: Vec<TriviaQuestion>) -> Self {
        Self {
            questions,
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QuestionSource for QuestionBank {
    async fn next_question(&self) -> RewardResult<TriviaQuestion> {
        if self.questions.is_empty() {
            return Err(RewardError::not_found("question", "bank"));
        }
        let idx = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            % self.questions.len();
        Ok(self.questions[idx].clone())
    }
}
