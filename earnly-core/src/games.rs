//! Engagement rewards: daily bonus, rewarded ads and mini-games

use chrono::{NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RewardsConfig;
use crate::engagement::{AdKind, EngagementGate, QuestionSource, QuizPrompt, TriviaQuestion};
use crate::ledger::{BalanceDelta, Ledger};
use crate::store::RewardStore;
use crate::{Account, Balances, EntryReason, GameKind, RewardError, RewardResult};

/// Pick a spin wheel segment. Returns the segment index and its prize.
pub fn spin_outcome<R: Rng + ?Sized>(segments: &[u64], rng: &mut R) -> Option<(usize, u64)> {
    if segments.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..segments.len());
    Some((idx, segments[idx]))
}

/// Draw a scratch card prize from `min..=max`
pub fn scratch_outcome<R: Rng + ?Sized>(min: u64, max: u64, rng: &mut R) -> u64 {
    if min >= max {
        return min;
    }
    rng.gen_range(min..=max)
}

/// What a game or bonus paid out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    pub game: Option<GameKind>,
    pub points: u64,
    /// Spin wheel segment that was hit
    pub segment: Option<usize>,
    pub balances: Balances,
}

/// Points granted for engagement outside the task pipeline
#[derive(Debug, Clone)]
pub struct Arcade {
    store: Arc<dyn RewardStore>,
    ledger: Ledger,
    gate: Arc<dyn EngagementGate>,
    questions: Arc<dyn QuestionSource>,
    rewards: RewardsConfig,
}

impl Arcade {
    /// Create an arcade
    pub fn new(
        store: Arc<dyn RewardStore>,
        ledger: Ledger,
        gate: Arc<dyn EngagementGate>,
        questions: Arc<dyn QuestionSource>,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            gate,
            questions,
            rewards,
        }
    }

    /// Claim today's bonus (UTC calendar day)
    pub async fn claim_daily_bonus(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.claim_daily_bonus_on(account_id, Utc::now().date_naive())
            .await
    }

    /// Claim the bonus for a given day. A second claim on the same day fails.
    pub async fn claim_daily_bonus_on(
        &self,
        account_id: &str,
        day: NaiveDate,
    ) -> RewardResult<GameOutcome> {
        let points = self.rewards.daily_bonus_points;
        let account = self
            .ledger
            .apply_delta_with(
                account_id,
                points_delta(points)?,
                EntryReason::DailyBonus,
                move |account: &mut Account| {
                    if account.last_daily_bonus == Some(day) {
                        return Err(RewardError::DailyBonusClaimed(account.id.clone()));
                    }
                    account.last_daily_bonus = Some(day);
                    Ok(())
                },
            )
            .await?;

        Ok(GameOutcome {
            game: None,
            points,
            segment: None,
            balances: account.balances(),
        })
    }

    /// Grant the rewarded-ad points once the ad is confirmed watched
    pub async fn watch_rewarded_ad(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.require_engagement(account_id).await?;
        let points = self.rewards.rewarded_ad_points;
        let balances = self
            .ledger
            .apply_delta(account_id, points_delta(points)?, EntryReason::RewardedAd)
            .await?;
        Ok(GameOutcome {
            game: None,
            points,
            segment: None,
            balances,
        })
    }

    /// Spin the wheel
    pub async fn spin(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.require_engagement(account_id).await?;
        let (segment, points) = spin_outcome(&self.rewards.spin_segments, &mut rand::thread_rng())
            .ok_or_else(|| RewardError::Configuration("spin wheel has no segments".to_string()))?;
        let mut outcome = self.grant(account_id, GameKind::Spin, points).await?;
        outcome.segment = Some(segment);
        Ok(outcome)
    }

    /// Scratch a card
    pub async fn scratch(&self, account_id: &str) -> RewardResult<GameOutcome> {
        self.require_engagement(account_id).await?;
        let points = scratch_outcome(
            self.rewards.scratch_min,
            self.rewards.scratch_max,
            &mut rand::thread_rng(),
        );
        self.grant(account_id, GameKind::Scratch, points).await
    }

    /// Fetch the next quiz question, falling back to the fixed one when generation fails
    pub async fn next_quiz(&self) -> QuizPrompt {
        match self.questions.next_question().await {
            Ok(question) if question.is_well_formed() => QuizPrompt {
                question,
                reward_points: self.rewards.quiz_points,
                fallback: false,
            },
            Ok(_) => {
                tracing::warn!("Generated quiz question is malformed, serving the fallback");
                self.fallback_quiz()
            }
            Err(e) => {
                tracing::warn!("Quiz generation failed, serving the fallback: {}", e);
                self.fallback_quiz()
            }
        }
    }

    /// Answer a quiz question. A wrong answer pays nothing; a right one pays after the ad.
    pub async fn answer_quiz(
        &self,
        account_id: &str,
        prompt: &QuizPrompt,
        choice: usize,
    ) -> RewardResult<GameOutcome> {
        if choice != prompt.question.correct_index {
            return self.grant(account_id, GameKind::Quiz, 0).await;
        }
        self.require_engagement(account_id).await?;
        self.grant(account_id, GameKind::Quiz, prompt.reward_points).await
    }

    fn fallback_quiz(&self) -> QuizPrompt {
        QuizPrompt {
            question: TriviaQuestion::fallback(),
            reward_points: self.rewards.quiz_points,
            fallback: true,
        }
    }

    async fn require_engagement(&self, account_id: &str) -> RewardResult<()> {
        // Blocked accounts never reach the ad
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| RewardError::not_found("account", account_id))?
            .ensure_active()?;
        if !self.gate.confirm(account_id, AdKind::Rewarded).await? {
            return Err(RewardError::EngagementIncomplete(account_id.to_string()));
        }
        Ok(())
    }

    async fn grant(&self, account_id: &str, game: GameKind, points: u64) -> RewardResult<GameOutcome> {
        let balances = if points == 0 {
            tracing::debug!("{:?} paid nothing for {}", game, account_id);
            self.ledger.balances(account_id).await?
        } else {
            self.ledger
                .apply_delta(account_id, points_delta(points)?, EntryReason::Game { game })
                .await?
        };
        Ok(GameOutcome {
            game: Some(game),
            points,
            segment: None,
            balances,
        })
    }
}

fn points_delta(points: u64) -> RewardResult<BalanceDelta> {
    i64::try_from(points)
        .map(BalanceDelta::points)
        .map_err(|_| RewardError::InvalidAmount(format!("{points} points is out of range")))
}
