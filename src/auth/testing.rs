//! Scripted identity provider for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AccountIdentity, AuthorityConfig, IdentityProvider, ScopeSet, SilentOutcome, TokenGrant,
};
use crate::error::AuthError;

pub fn authority() -> AuthorityConfig {
    authority_with_api("https://graph.microsoft.com/v1.0/me/calendar")
}

pub fn authority_with_api(api_base_url: &str) -> AuthorityConfig {
    AuthorityConfig::new(
        "https://login.microsoftonline.com/",
        "common",
        "00000000-0000-0000-0000-000000000000",
        "https://login.microsoftonline.com/common/oauth2/nativeclient",
        api_base_url,
        ScopeSet::parse("User.Read Calendars.Read"),
    )
    .unwrap()
}

pub fn account() -> AccountIdentity {
    AccountIdentity {
        id: "oid.tid".to_string(),
        display_name: "Ada Lovelace".to_string(),
    }
}

/// Silent acquisition succeeds whenever an account is cached, unless a
/// scripted outcome is queued. Interactive sign-in caches the account.
pub struct FakeProvider {
    pub silent_calls: AtomicUsize,
    pub interactive_calls: AtomicUsize,
    issued: AtomicUsize,
    accounts: Mutex<Vec<AccountIdentity>>,
    silent_script: Mutex<VecDeque<SilentOutcome>>,
    silent_accounts: Mutex<Vec<Option<String>>>,
    interactive_requests: Mutex<Vec<(ScopeSet, Option<String>)>>,
    interactive_delay: Duration,
    interactive_error: Option<AuthError>,
    granted_scopes: Option<ScopeSet>,
    expires_in: u64,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            silent_calls: AtomicUsize::new(0),
            interactive_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            accounts: Mutex::new(Vec::new()),
            silent_script: Mutex::new(VecDeque::new()),
            silent_accounts: Mutex::new(Vec::new()),
            interactive_requests: Mutex::new(Vec::new()),
            interactive_delay: Duration::ZERO,
            interactive_error: None,
            granted_scopes: None,
            expires_in: 3600,
        }
    }

    /// Provider with one cached account, so silent acquisition succeeds.
    pub fn signed_in() -> Self {
        let provider = Self::new();
        provider.accounts.lock().unwrap().push(account());
        provider
    }

    pub fn with_interactive_delay(mut self, delay: Duration) -> Self {
        self.interactive_delay = delay;
        self
    }

    pub fn with_interactive_error(mut self, err: AuthError) -> Self {
        self.interactive_error = Some(err);
        self
    }

    pub fn with_granted_scopes(mut self, scopes: ScopeSet) -> Self {
        self.granted_scopes = Some(scopes);
        self
    }

    pub fn with_expires_in(mut self, secs: u64) -> Self {
        self.expires_in = secs;
        self
    }

    pub fn push_silent(&self, outcome: SilentOutcome) {
        self.silent_script.lock().unwrap().push_back(outcome);
    }

    pub fn silent_accounts(&self) -> Vec<Option<String>> {
        self.silent_accounts.lock().unwrap().clone()
    }

    pub fn interactive_requests(&self) -> Vec<(ScopeSet, Option<String>)> {
        self.interactive_requests.lock().unwrap().clone()
    }

    fn issue(&self, scopes: &ScopeSet, account: AccountIdentity) -> TokenGrant {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let granted = self.granted_scopes.clone().unwrap_or_else(|| scopes.clone());
        TokenGrant::new(format!("token-{}", n), Some(self.expires_in), granted, account)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn accounts(&self) -> Vec<AccountIdentity> {
        self.accounts.lock().unwrap().clone()
    }

    async fn acquire_silent(
        &self,
        account: Option<&AccountIdentity>,
        scopes: &ScopeSet,
    ) -> SilentOutcome {
        self.silent_calls.fetch_add(1, Ordering::SeqCst);
        self.silent_accounts
            .lock()
            .unwrap()
            .push(account.map(|a| a.id.clone()));

        if let Some(outcome) = self.silent_script.lock().unwrap().pop_front() {
            return outcome;
        }
        match account {
            Some(account) => SilentOutcome::Silent(self.issue(scopes, account.clone())),
            None => SilentOutcome::NeedsInteractive { claims: None },
        }
    }

    async fn acquire_interactive(
        &self,
        scopes: &ScopeSet,
        claims: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        self.interactive_calls.fetch_add(1, Ordering::SeqCst);
        self.interactive_requests
            .lock()
            .unwrap()
            .push((scopes.clone(), claims.map(String::from)));

        if !self.interactive_delay.is_zero() {
            tokio::time::sleep(self.interactive_delay).await;
        }
        if let Some(err) = &self.interactive_error {
            return Err(err.clone());
        }

        let mut accounts = self.accounts.lock().unwrap();
        if accounts.is_empty() {
            accounts.push(account());
        }
        drop(accounts);
        Ok(self.issue(scopes, account()))
    }
}
