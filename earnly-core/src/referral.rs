//! Account sign-in, referral codes and the referral bonus rule

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::SignupConfig;
use crate::ledger::Ledger;
use crate::store::RewardStore;
use crate::{Account, AdminSettings, RewardError, RewardResult, VerifiedSession};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 16;

/// Build a referral code from the first three letters of `name` and three random characters.
///
/// Names with fewer than three letters are padded with `X`.
pub fn generate_referral_code<R: Rng + ?Sized>(name: &str, rng: &mut R) -> String {
    let mut code: String = name
        .chars()
        .filter(char::is_ascii_alphabetic)
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    while code.len() < 3 {
        code.push('X');
    }
    for _ in 0..3 {
        let idx = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(char::from(CODE_ALPHABET[idx]));
    }
    code
}

/// Result of a sign-in
#[derive(Debug, Clone, PartialEq)]
pub struct SignIn {
    pub account: Account,
    /// True when this sign-in created the account
    pub created: bool,
}

/// Creates and resolves accounts for verified sessions
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    store: Arc<dyn RewardStore>,
    ledger: Ledger,
    signup: SignupConfig,
}

impl AccountRegistry {
    /// Create a registry over a store
    pub fn new(store: Arc<dyn RewardStore>, ledger: Ledger, signup: SignupConfig) -> Self {
        Self {
            store,
            ledger,
            signup,
        }
    }

    /// Resolve the account for a verified session, creating it on first sign-in.
    ///
    /// A non-empty `referral_code` only matters on creation. An unknown code, or a failure while
    /// crediting the referrer, never fails the signup.
    pub async fn sign_in(
        &self,
        session: &VerifiedSession,
        name: &str,
        referral_code: Option<&str>,
        settings: &AdminSettings,
    ) -> RewardResult<SignIn> {
        if let Some(account) = self.store.get_account(&session.account_id).await? {
            account.ensure_active()?;
            tracing::debug!("Existing account {} signed in", account.id);
            return Ok(SignIn {
                account,
                created: false,
            });
        }

        let referral_code = referral_code.map(str::trim).filter(|code| !code.is_empty());
        let referred = referral_code.is_some();
        let (balance, points) = if referred {
            (
                self.signup.base_primary + settings.referral_bonus_primary,
                self.signup
                    .base_points
                    .saturating_add(settings.referral_bonus_points),
            )
        } else {
            (self.signup.base_primary, self.signup.base_points)
        };
        let is_admin = self
            .signup
            .admin_mobile
            .as_deref()
            .is_some_and(|mobile| mobile == session.mobile);

        let mut attempts = 0;
        let account = loop {
            attempts += 1;
            let code = generate_referral_code(name, &mut rand::thread_rng());
            let account = Account {
                id: session.account_id.clone(),
                name: name.to_string(),
                mobile: session.mobile.clone(),
                balance,
                points,
                completed_tasks: 0,
                is_admin,
                is_blocked: false,
                referral_code: code,
                referred_by: referral_code.map(str::to_string),
                referral_count: 0,
                referral_income: Decimal::ZERO,
                joined_at: Utc::now(),
                last_daily_bonus: None,
            };

            match self.store.insert_account(account.clone()).await {
                Ok(()) => break account,
                Err(RewardError::AccountExists(_)) => {
                    // Lost a race with a concurrent sign-in for the same id
                    if let Some(existing) = self.store.get_account(&session.account_id).await? {
                        existing.ensure_active()?;
                        return Ok(SignIn {
                            account: existing,
                            created: false,
                        });
                    }
                    if attempts >= MAX_CODE_ATTEMPTS {
                        return Err(RewardError::AccountExists(format!(
                            "no free referral code for {name} after {attempts} attempts"
                        )));
                    }
                    tracing::debug!("Referral code collision for {}, retrying", session.account_id);
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            "Created account {} (code {}, admin: {}) with {} / {} points",
            account.id,
            account.referral_code,
            account.is_admin,
            account.balance,
            account.points
        );
        self.ledger.journal_signup(&account).await;

        if let Some(code) = referral_code {
            self.credit_referrer(code, &account.id, settings).await;
        }

        Ok(SignIn {
            account,
            created: true,
        })
    }

    /// Look up an account by its referral code
    pub async fn find_by_referral_code(&self, code: &str) -> RewardResult<Option<Account>> {
        self.store.find_account_by_referral_code(code).await
    }

    async fn credit_referrer(&self, code: &str, new_account: &str, settings: &AdminSettings) {
        let referrer = match self.store.find_account_by_referral_code(code).await {
            Ok(Some(referrer)) if referrer.id != new_account => referrer,
            Ok(_) => {
                tracing::debug!("Referral code {} matched no other account", code);
                return;
            }
            Err(e) => {
                tracing::warn!("Referrer lookup for code {} failed: {}", code, e);
                return;
            }
        };

        let bonus = settings.referral_bonus_primary;
        let credited = self
            .store
            .update_account(
                &referrer.id,
                Box::new(move |account: &mut Account| {
                    account.referral_count = account.referral_count.saturating_add(1);
                    account.referral_income += bonus;
                    Ok(())
                }),
            )
            .await;

        match credited {
            Ok(account) => tracing::info!(
                "Referrer {} credited for {} (referrals: {})",
                account.id,
                new_account,
                account.referral_count
            ),
            Err(e) => tracing::warn!(
                "Could not credit referrer {} for {}: {}",
                referrer.id,
                new_account,
                e
            ),
        }
    }
}
