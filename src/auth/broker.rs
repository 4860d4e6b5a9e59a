//! Token broker: cached grant, then silent acquisition, then interactive sign-in
//!
//! The broker owns the session (authority plus the single current grant).
//! At most one interactive sign-in runs at a time; concurrent callers that
//! need one join the sign-in already in flight and share its outcome.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tokio::sync::Mutex;

use super::{AccountIdentity, AuthorityConfig, ScopeSet, TokenGrant};
use crate::error::AuthError;

/// Result of a silent acquisition attempt.
#[derive(Debug, Clone)]
pub enum SilentOutcome {
    Silent(TokenGrant),
    /// Stored credentials are insufficient. Carries the provider's claims
    /// challenge, if any, for the interactive request.
    NeedsInteractive { claims: Option<String> },
    Failed(AuthError),
}

impl From<AuthError> for SilentOutcome {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InteractiveRequired { claims } => SilentOutcome::NeedsInteractive { claims },
            other => SilentOutcome::Failed(other),
        }
    }
}

/// Identity provider seam used by [`TokenBroker`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Accounts currently cached by the provider, most recent sign-in first.
    async fn accounts(&self) -> Vec<AccountIdentity>;

    async fn acquire_silent(
        &self,
        account: Option<&AccountIdentity>,
        scopes: &ScopeSet,
    ) -> SilentOutcome;

    async fn acquire_interactive(
        &self,
        scopes: &ScopeSet,
        claims: Option<&str>,
    ) -> Result<TokenGrant, AuthError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Unauthenticated,
    SilentAttempt,
    InteractiveAttempt,
    Authenticated,
    Failed,
}

type SignInFuture = BoxFuture<'static, Result<TokenGrant, AuthError>>;
type InteractiveSignIn = Shared<SignInFuture>;

struct Session {
    state: BrokerState,
    grant: Option<TokenGrant>,
    /// Weak so that a sign-in every caller has abandoned is dropped rather
    /// than left half-run.
    pending: Option<WeakShared<SignInFuture>>,
}

impl Session {
    /// The sign-in still in flight, if any caller is waiting on it.
    fn live_pending(&mut self) -> Option<InteractiveSignIn> {
        let live = self.pending.as_ref().and_then(WeakShared::upgrade);
        if live.is_none() && self.pending.take().is_some() {
            tracing::info!("Interactive sign-in abandoned by all callers");
            self.state = BrokerState::Unauthenticated;
        }
        live
    }
}

pub struct TokenBroker {
    authority: Arc<AuthorityConfig>,
    provider: Arc<dyn IdentityProvider>,
    session: Arc<Mutex<Session>>,
}

impl TokenBroker {
    pub fn new(authority: Arc<AuthorityConfig>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            authority,
            provider,
            session: Arc::new(Mutex::new(Session {
                state: BrokerState::Unauthenticated,
                grant: None,
                pending: None,
            })),
        }
    }

    pub fn authority(&self) -> &AuthorityConfig {
        &self.authority
    }

    pub async fn state(&self) -> BrokerState {
        let mut session = self.session.lock().await;
        session.live_pending();
        session.state
    }

    /// Return a grant covering `scopes`, acquiring one if needed.
    pub async fn get_access_token(&self, scopes: &ScopeSet) -> Result<TokenGrant, AuthError> {
        let pending = {
            let mut session = self.session.lock().await;
            if let Some(grant) = session.grant.as_ref().filter(|g| g.satisfies(scopes)) {
                tracing::debug!("Reusing cached token (expires {})", grant.expires_at);
                return Ok(grant.clone());
            }
            let pending = session.live_pending();
            if pending.is_none() {
                session.state = BrokerState::SilentAttempt;
            }
            pending
        };

        if let Some(pending) = pending {
            tracing::info!("Waiting for sign-in already in progress...");
            let grant = pending.await?;
            if grant.granted_scopes.covers(scopes) {
                return Ok(grant);
            }
        }

        let accounts = self.provider.accounts().await;
        if accounts.len() > 1 {
            tracing::debug!(
                "{} cached accounts, using the first for silent acquisition",
                accounts.len()
            );
        }
        let account = accounts.into_iter().next();

        let claims = match self.provider.acquire_silent(account.as_ref(), scopes).await {
            SilentOutcome::Silent(grant) if grant.granted_scopes.covers(scopes) => {
                tracing::info!("Token acquired silently for {}", grant.account.display_name);
                return Ok(self.store(grant).await);
            }
            SilentOutcome::Silent(grant) => {
                tracing::info!(
                    "Silent grant covers '{}', need '{}'",
                    grant.granted_scopes,
                    scopes
                );
                None
            }
            SilentOutcome::NeedsInteractive { claims }
            | SilentOutcome::Failed(AuthError::InteractiveRequired { claims }) => claims,
            SilentOutcome::Failed(err) => {
                tracing::warn!("Silent token acquisition failed: {}", err);
                self.session.lock().await.state = BrokerState::Failed;
                return Err(err);
            }
        };

        self.acquire_interactive(scopes, claims).await
    }

    /// Drop `grant` from the session if it is still the current one.
    pub async fn invalidate(&self, grant: &TokenGrant) {
        let mut session = self.session.lock().await;
        if session
            .grant
            .as_ref()
            .is_some_and(|g| g.access_token == grant.access_token)
        {
            tracing::debug!("Invalidating cached token");
            session.grant = None;
            session.state = BrokerState::Unauthenticated;
        }
    }

    async fn store(&self, grant: TokenGrant) -> TokenGrant {
        let mut session = self.session.lock().await;
        session.grant = Some(grant.clone());
        session.state = BrokerState::Authenticated;
        grant
    }

    async fn acquire_interactive(
        &self,
        scopes: &ScopeSet,
        claims: Option<String>,
    ) -> Result<TokenGrant, AuthError> {
        loop {
            let (sign_in, leader) = {
                let mut session = self.session.lock().await;
                // Another caller may have finished signing in meanwhile.
                if let Some(grant) = session.grant.as_ref().filter(|g| g.satisfies(scopes)) {
                    return Ok(grant.clone());
                }
                match session.live_pending() {
                    Some(pending) => (pending, false),
                    None => {
                        let sign_in = self.interactive_sign_in(scopes.clone(), claims.clone());
                        session.state = BrokerState::InteractiveAttempt;
                        session.pending = sign_in.downgrade();
                        (sign_in, true)
                    }
                }
            };

            let grant = sign_in.await?;
            if leader || grant.granted_scopes.covers(scopes) {
                return Ok(grant);
            }
            // Joined a sign-in for a narrower scope set; start our own.
        }
    }

    /// Build the shared interactive future. Whichever caller drives it to
    /// completion also records the outcome in the session. If every caller
    /// drops it first, the provider's sign-in is dropped with it.
    fn interactive_sign_in(&self, scopes: ScopeSet, claims: Option<String>) -> InteractiveSignIn {
        let provider = Arc::clone(&self.provider);
        let session = Arc::clone(&self.session);

        async move {
            tracing::info!("Starting interactive sign-in for '{}'", scopes);
            let result = provider
                .acquire_interactive(&scopes, claims.as_deref())
                .await
                .and_then(|grant| {
                    if grant.granted_scopes.covers(&scopes) {
                        Ok(grant)
                    } else {
                        Err(AuthError::ProviderRejected(format!(
                            "granted scopes '{}' do not cover '{}'",
                            grant.granted_scopes, scopes
                        )))
                    }
                });

            let mut session = session.lock().await;
            session.pending = None;
            match &result {
                Ok(grant) => {
                    tracing::info!("Signed in as {}", grant.account.display_name);
                    session.grant = Some(grant.clone());
                    session.state = BrokerState::Authenticated;
                }
                Err(err) => {
                    tracing::warn!("Interactive sign-in failed: {}", err);
                    session.state = BrokerState::Failed;
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}
