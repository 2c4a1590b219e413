//! The authentication state machine.
//!
//! One [`AuthSession`] instance owns the process-wide credential state.
//! Dependent components read snapshots; every transition goes through the
//! single writer path here.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::cookie::credentials_from_cookie_string;
use crate::auth::credential::{CredentialStore, Credentials};
use crate::auth::passport::{AccountProfile, ChallengePoll, LoginChallenge, PassportApi};
use crate::error::AuthError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Anonymous,
    AwaitingScan,
    AwaitingConfirm,
    Authenticated,
    Expired,
}

/// Account access level. Derived from state transitions plus account
/// metadata, never set directly by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementTier {
    Guest,
    Member,
    PremiumMember,
}

#[derive(Debug)]
struct SessionInner {
    state: AuthState,
    tier: EntitlementTier,
    credentials: Option<Credentials>,
}

pub struct AuthSession {
    passport: Arc<dyn PassportApi>,
    store: CredentialStore,
    inner: RwLock<SessionInner>,
    poll_interval: Duration,
    challenge_timeout: Duration,
}

impl AuthSession {
    pub fn new(passport: Arc<dyn PassportApi>, store: CredentialStore) -> Self {
        Self {
            passport,
            store,
            inner: RwLock::new(SessionInner {
                state: AuthState::Anonymous,
                tier: EntitlementTier::Guest,
                credentials: None,
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
            challenge_timeout: DEFAULT_CHALLENGE_TIMEOUT,
        }
    }

    /// Construct from the persisted record. A present record starts the
    /// session Authenticated at Member tier; [`Self::validate`] refines the
    /// tier against the live account.
    pub async fn restore(passport: Arc<dyn PassportApi>, store: CredentialStore) -> Self {
        let session = Self::new(passport, store);
        if let Some(credentials) = session.store.load().await {
            debug!("restored persisted session");
            session.transition(|inner| {
                inner.state = AuthState::Authenticated;
                inner.tier = EntitlementTier::Member;
                inner.credentials = Some(credentials);
            });
        }
        session
    }

    /// Override the polling cadence (tests use millisecond ticks).
    pub fn with_polling(mut self, interval: Duration, challenge_timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.challenge_timeout = challenge_timeout;
        self
    }

    pub fn state(&self) -> AuthState {
        self.inner.read().state
    }

    pub fn tier(&self) -> EntitlementTier {
        self.inner.read().tier
    }

    /// Stable snapshot for concurrent authorized requests.
    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.read().credentials.clone()
    }

    fn transition(&self, apply: impl FnOnce(&mut SessionInner)) {
        let mut inner = self.inner.write();
        apply(&mut inner);
    }

    fn reset_to_anonymous(&self) {
        self.transition(|inner| {
            inner.state = AuthState::Anonymous;
            inner.tier = EntitlementTier::Guest;
            inner.credentials = None;
        });
    }

    fn apply_profile(&self, profile: &AccountProfile) {
        self.transition(|inner| {
            // Once expired, the tier never upgrades silently.
            if inner.state == AuthState::Expired {
                return;
            }
            inner.tier = if profile.is_vip() {
                EntitlementTier::PremiumMember
            } else {
                EntitlementTier::Member
            };
        });
    }

    /// Request a login challenge and enter `AwaitingScan`.
    ///
    /// A login request supersedes any existing in-memory session; credentials
    /// are replaced wholesale once the new challenge confirms.
    pub async fn begin_login(&self) -> Result<LoginChallenge, AuthError> {
        let challenge = self.passport.request_challenge().await?;
        self.transition(|inner| {
            inner.state = AuthState::AwaitingScan;
            inner.tier = EntitlementTier::Guest;
            inner.credentials = None;
        });
        debug!(challenge = %challenge.challenge_id, "login challenge issued");
        Ok(challenge)
    }

    /// Poll `challenge` until it confirms, expires, or the caller cancels.
    ///
    /// Polls on a fixed interval; cancellation is observed between ticks,
    /// never mid-request, and always lands in `Anonymous`. Challenge expiry
    /// (platform-reported or the local deadline) reports
    /// [`AuthError::LoginTimeout`].
    pub async fn await_login(
        &self,
        challenge: &LoginChallenge,
        cancel: &CancellationToken,
    ) -> Result<AuthState, AuthError> {
        let deadline = tokio::time::Instant::now() + self.challenge_timeout;

        loop {
            if cancel.is_cancelled() {
                self.reset_to_anonymous();
                return Ok(AuthState::Anonymous);
            }

            let poll = match self.passport.poll_challenge(&challenge.challenge_id).await {
                Ok(poll) => poll,
                Err(e) => {
                    // Never leave the machine stuck in a waiting state.
                    self.reset_to_anonymous();
                    return Err(e);
                }
            };

            match poll {
                ChallengePoll::Pending => {}
                ChallengePoll::Scanned => self.transition(|inner| {
                    if inner.state == AuthState::AwaitingScan {
                        inner.state = AuthState::AwaitingConfirm;
                    }
                }),
                ChallengePoll::Confirmed(credentials) => {
                    let credentials = *credentials;
                    if let Err(e) = self.store.save(&credentials).await {
                        warn!(error = %e, "failed to persist credentials");
                    }
                    self.transition(|inner| {
                        inner.state = AuthState::Authenticated;
                        inner.tier = EntitlementTier::Member;
                        inner.credentials = Some(credentials.clone());
                    });
                    // Best effort tier refinement; a flaky profile fetch must
                    // not fail a confirmed login.
                    if let Ok(profile) = self.passport.fetch_profile(&credentials).await {
                        self.apply_profile(&profile);
                    }
                    return Ok(AuthState::Authenticated);
                }
                ChallengePoll::Expired => {
                    self.reset_to_anonymous();
                    return Err(AuthError::LoginTimeout);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.reset_to_anonymous();
                    return Ok(AuthState::Anonymous);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if tokio::time::Instant::now() >= deadline {
                self.reset_to_anonymous();
                return Err(AuthError::LoginTimeout);
            }
        }
    }

    /// Import a browser cookie string, skipping the QR flow entirely.
    ///
    /// A malformed string fails with [`AuthError::InvalidCookieFormat`] and
    /// leaves the state untouched.
    pub async fn import_cookie(&self, raw: &str) -> Result<(), AuthError> {
        let credentials = credentials_from_cookie_string(raw)?;

        if let Err(e) = self.store.save(&credentials).await {
            warn!(error = %e, "failed to persist imported credentials");
        }
        self.transition(|inner| {
            inner.state = AuthState::Authenticated;
            inner.tier = EntitlementTier::Member;
            inner.credentials = Some(credentials.clone());
        });

        match self.passport.fetch_profile(&credentials).await {
            Ok(profile) => {
                self.apply_profile(&profile);
                Ok(())
            }
            Err(AuthError::AuthExpired) => {
                self.mark_expired().await;
                Err(AuthError::AuthExpired)
            }
            // Offline import still counts; the tier stays at Member.
            Err(e) => {
                debug!(error = %e, "profile fetch failed after cookie import");
                Ok(())
            }
        }
    }

    /// Re-check the live account behind the current credentials and refine
    /// the tier. An authentication-rejected response expires the session.
    pub async fn validate(&self) -> Result<EntitlementTier, AuthError> {
        let Some(credentials) = self.credentials() else {
            return Ok(self.tier());
        };

        match self.passport.fetch_profile(&credentials).await {
            Ok(profile) => {
                self.apply_profile(&profile);
                Ok(self.tier())
            }
            Err(AuthError::AuthExpired) => {
                self.mark_expired().await;
                Err(AuthError::AuthExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Transition to `Expired` after the platform rejected an authorized
    /// request. Clears the persisted record; the tier drops to Guest and
    /// never upgrades again without an explicit re-login.
    pub async fn mark_expired(&self) {
        self.transition(|inner| {
            inner.state = AuthState::Expired;
            inner.tier = EntitlementTier::Guest;
            inner.credentials = None;
        });
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store");
        }
    }

    /// Explicit logout from any state.
    pub async fn logout(&self) {
        self.reset_to_anonymous();
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct MockPassport {
        polls: Mutex<VecDeque<ChallengePoll>>,
        profile: Mutex<Result<AccountProfile, ()>>,
        cancel_after_poll: Mutex<Option<CancellationToken>>,
    }

    impl MockPassport {
        fn new(polls: Vec<ChallengePoll>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                profile: Mutex::new(Ok(AccountProfile::default())),
                cancel_after_poll: Mutex::new(None),
            }
        }

        fn with_profile(self, profile: AccountProfile) -> Self {
            *self.profile.lock() = Ok(profile);
            self
        }

        fn with_expired_profile(self) -> Self {
            *self.profile.lock() = Err(());
            self
        }
    }

    #[async_trait::async_trait]
    impl PassportApi for MockPassport {
        async fn request_challenge(&self) -> Result<LoginChallenge, AuthError> {
            Ok(LoginChallenge {
                challenge_id: "challenge-1".into(),
                qr_content: "https://passport.example.com/scan?key=challenge-1".into(),
            })
        }

        async fn poll_challenge(&self, _challenge_id: &str) -> Result<ChallengePoll, AuthError> {
            let poll = self
                .polls
                .lock()
                .pop_front()
                .unwrap_or(ChallengePoll::Pending);
            if let Some(token) = self.cancel_after_poll.lock().take() {
                token.cancel();
            }
            Ok(poll)
        }

        async fn fetch_profile(
            &self,
            _credentials: &Credentials,
        ) -> Result<AccountProfile, AuthError> {
            self.profile
                .lock()
                .clone()
                .map_err(|_| AuthError::AuthExpired)
        }
    }

    fn confirmed() -> ChallengePoll {
        ChallengePoll::Confirmed(Box::new(Credentials::new("sess", "csrf")))
    }

    fn session_with(passport: MockPassport, dir: &tempfile::TempDir) -> AuthSession {
        AuthSession::new(
            Arc::new(passport),
            CredentialStore::new(dir.path().join("credentials.json")),
        )
        .with_polling(Duration::from_millis(1), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn qr_login_walks_through_states_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let passport = MockPassport::new(vec![
            ChallengePoll::Pending,
            ChallengePoll::Scanned,
            confirmed(),
        ])
        .with_profile(AccountProfile {
            user_id: Some(42),
            name: Some("tester".into()),
            vip_type: 2,
        });
        let session = session_with(passport, &dir);

        let challenge = session.begin_login().await.unwrap();
        assert_eq!(session.state(), AuthState::AwaitingScan);

        let state = session
            .await_login(&challenge, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state, AuthState::Authenticated);
        assert_eq!(session.tier(), EntitlementTier::PremiumMember);

        // Credentials landed in the store.
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        assert!(store.load().await.is_some());
    }

    #[tokio::test]
    async fn platform_expiry_reports_login_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(MockPassport::new(vec![ChallengePoll::Expired]), &dir);

        let challenge = session.begin_login().await.unwrap();
        let err = session
            .await_login(&challenge, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LoginTimeout));
        assert_eq!(session.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn local_deadline_reports_login_timeout() {
        let dir = tempfile::tempdir().unwrap();
        // Mock yields Pending forever; the local deadline has to fire.
        let session = session_with(MockPassport::new(vec![]), &dir);

        let challenge = session.begin_login().await.unwrap();
        let err = session
            .await_login(&challenge, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LoginTimeout));
        assert_eq!(session.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn cancellation_always_lands_in_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let passport = MockPassport::new(vec![ChallengePoll::Scanned]);
        let token = CancellationToken::new();
        *passport.cancel_after_poll.lock() = Some(token.clone());
        let session = session_with(passport, &dir);

        let challenge = session.begin_login().await.unwrap();
        // First poll reports Scanned (AwaitingConfirm) and then the caller
        // cancels; the next tick must observe it.
        let state = session.await_login(&challenge, &token).await.unwrap();
        assert_eq!(state, AuthState::Anonymous);
        assert_eq!(session.state(), AuthState::Anonymous);
        assert_eq!(session.tier(), EntitlementTier::Guest);
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_polls() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(MockPassport::new(vec![confirmed()]), &dir);

        let challenge = session.begin_login().await.unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let state = session.await_login(&challenge, &token).await.unwrap();
        assert_eq!(state, AuthState::Anonymous);
    }

    #[tokio::test]
    async fn cookie_import_missing_key_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(MockPassport::new(vec![]), &dir);

        let err = session
            .import_cookie("SESSDATA=only-session-token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCookieFormat { .. }));
        assert_eq!(session.state(), AuthState::Anonymous);
        assert_eq!(session.tier(), EntitlementTier::Guest);
        assert!(session.credentials().is_none());
    }

    #[tokio::test]
    async fn cookie_import_authenticates_directly() {
        let dir = tempfile::tempdir().unwrap();
        let passport = MockPassport::new(vec![]).with_profile(AccountProfile {
            user_id: Some(7),
            name: None,
            vip_type: 1,
        });
        let session = session_with(passport, &dir);

        session
            .import_cookie("SESSDATA=abc; bili_jct=xyz; DedeUserID=7")
            .await
            .unwrap();
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.tier(), EntitlementTier::PremiumMember);
    }

    #[tokio::test]
    async fn rejected_import_expires_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(MockPassport::new(vec![]).with_expired_profile(), &dir);

        let err = session
            .import_cookie("SESSDATA=stale; bili_jct=stale")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthExpired));
        assert_eq!(session.state(), AuthState::Expired);
        assert_eq!(session.tier(), EntitlementTier::Guest);
    }

    #[tokio::test]
    async fn expiry_is_monotonic_and_clears_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&Credentials::new("sess", "csrf")).await.unwrap();

        let passport = MockPassport::new(vec![]).with_profile(AccountProfile {
            user_id: Some(1),
            name: None,
            vip_type: 2,
        });
        let session = AuthSession::restore(Arc::new(passport), store.clone()).await;
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.validate().await.unwrap(), EntitlementTier::PremiumMember);

        session.mark_expired().await;
        assert_eq!(session.state(), AuthState::Expired);
        assert_eq!(session.tier(), EntitlementTier::Guest);
        assert!(store.load().await.is_none());

        // No silent upgrade after expiry.
        assert_eq!(session.validate().await.unwrap(), EntitlementTier::Guest);
    }

    #[tokio::test]
    async fn logout_from_any_state() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(MockPassport::new(vec![]), &dir);
        session
            .import_cookie("SESSDATA=abc; bili_jct=xyz")
            .await
            .unwrap();
        assert_eq!(session.state(), AuthState::Authenticated);

        session.logout().await;
        assert_eq!(session.state(), AuthState::Anonymous);
        assert!(session.credentials().is_none());
    }
}
