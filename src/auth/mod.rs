//! Authentication module for Microsoft 365
//!
//! Resolves the Azure AD authority from settings, and brokers delegated
//! access tokens: cached grants are reused, then silent refresh is tried,
//! then an interactive device-code sign-in.

pub mod broker;
pub mod oauth;
#[cfg(test)]
pub mod testing;
pub mod tokens;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use url::Url;

use crate::config::Settings;
use crate::error::ConfigurationError;

pub use broker::{IdentityProvider, SilentOutcome, TokenBroker};
pub use oauth::AadProvider;
pub use tokens::{AccountIdentity, TokenGrant};

/// Sign in with the configured scopes and report the account.
///
/// Nothing is persisted; this verifies the app registration and consent.
pub async fn login(settings: &Settings) -> Result<()> {
    let authority = Arc::new(
        settings
            .authority_config()
            .context("Invalid configuration")?,
    );
    let provider = Arc::new(AadProvider::new(&authority).context("Invalid configuration")?);
    let broker = TokenBroker::new(Arc::clone(&authority), provider);

    let grant = broker
        .get_access_token(&authority.scopes)
        .await
        .context("Sign-in failed")?;
    tracing::debug!("Broker state: {:?}", broker.state().await);

    println!("Signed in as: {}", grant.account.display_name);
    println!("Account ID:   {}", grant.account.id);
    println!("Scopes:       {}", grant.granted_scopes);
    println!("Expires at:   {}", grant.expires_at);
    Ok(())
}

/// OpenID Connect scopes that are always requested and never count towards
/// scope coverage.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Case-insensitive set of delegated permission scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Parse a space separated scope string as sent on the wire.
    pub fn parse(scopes: &str) -> Self {
        scopes.split_whitespace().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// `self ⊇ other`
    pub fn covers(&self, other: &ScopeSet) -> bool {
        other.0.is_subset(&self.0)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty() && !RESERVED_SCOPES.contains(&s.as_str()))
                .collect(),
        )
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(" "))
    }
}

/// Azure AD authority and client identity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    pub instance_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub redirect_target: String,
    pub api_base_url: Url,
    pub scopes: ScopeSet,
}

impl AuthorityConfig {
    pub fn new(
        instance_url: &str,
        tenant_id: &str,
        client_id: &str,
        redirect_target: &str,
        api_base_url: &str,
        scopes: ScopeSet,
    ) -> Result<Self, ConfigurationError> {
        let instance_url = required("instance", instance_url)?;
        let tenant_id = required("tenant_id", tenant_id)?;
        let client_id = required("client_id", client_id)?;
        let redirect_target = required("redirect_uri", redirect_target)?;
        let api_base_url = required("api_base_url", api_base_url)?;

        parse_url("instance", &instance_url)?;
        parse_url("redirect_uri", &redirect_target)?;
        let api_base_url = parse_url("api_base_url", api_base_url.trim_end_matches('/'))?;

        if scopes.is_empty() {
            return Err(ConfigurationError::EmptyScopes);
        }

        let config = Self {
            instance_url,
            tenant_id,
            client_id,
            redirect_target,
            api_base_url,
            scopes,
        };
        config.calendar_view_url()?;
        Ok(config)
    }

    /// `instance + tenant`, e.g. `https://login.microsoftonline.com/common`
    pub fn authority(&self) -> String {
        format!(
            "{}/{}",
            self.instance_url.trim_end_matches('/'),
            self.tenant_id.trim_matches('/')
        )
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.authority())
    }

    /// `{api_base_url}/calendarView`
    pub fn calendar_view_url(&self) -> Result<Url, ConfigurationError> {
        let mut url = self.api_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigurationError::InvalidUrl {
                field: "api_base_url",
                reason: "cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .push("calendarView");
        Ok(url)
    }
}

fn required(field: &'static str, value: &str) -> Result<String, ConfigurationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigurationError::MissingField(field));
    }
    Ok(value.to_string())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigurationError> {
    Url::parse(value).map_err(|e| ConfigurationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(instance: &str, tenant: &str) -> Result<AuthorityConfig, ConfigurationError> {
        AuthorityConfig::new(
            instance,
            tenant,
            "client",
            "https://login.microsoftonline.com/common/oauth2/nativeclient",
            "https://graph.microsoft.com/v1.0/me/calendar/",
            ScopeSet::parse("User.Read Calendars.Read"),
        )
    }

    #[test]
    fn test_authority_joins_instance_and_tenant() {
        let with_slash = config("https://login.microsoftonline.com/", "common").unwrap();
        let without_slash = config("https://login.microsoftonline.com", "common").unwrap();
        assert_eq!(with_slash.authority(), "https://login.microsoftonline.com/common");
        assert_eq!(with_slash.authority(), without_slash.authority());
        assert_eq!(
            with_slash.device_code_url(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let cfg = config("https://login.microsoftonline.com/", "common").unwrap();
        assert_eq!(
            cfg.api_base_url.as_str(),
            "https://graph.microsoft.com/v1.0/me/calendar"
        );
    }

    #[test]
    fn test_calendar_view_url_appends_segment() {
        let cfg = config("https://login.microsoftonline.com/", "common").unwrap();
        assert_eq!(
            cfg.calendar_view_url().unwrap().as_str(),
            "https://graph.microsoft.com/v1.0/me/calendar/calendarView"
        );

        let bare = AuthorityConfig::new(
            "https://login.microsoftonline.com/",
            "common",
            "client",
            "https://localhost",
            "http://localhost:8080",
            ScopeSet::parse("Calendars.Read"),
        )
        .unwrap();
        assert_eq!(
            bare.calendar_view_url().unwrap().as_str(),
            "http://localhost:8080/calendarView"
        );
    }

    #[test]
    fn test_opaque_api_base_rejected() {
        let err = AuthorityConfig::new(
            "https://login.microsoftonline.com/",
            "common",
            "client",
            "https://localhost",
            "mailto:calendar@example.com",
            ScopeSet::parse("Calendars.Read"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidUrl { field: "api_base_url", .. }
        ));
    }

    #[test]
    fn test_missing_tenant_rejected() {
        assert_eq!(
            config("https://login.microsoftonline.com/", "  "),
            Err(ConfigurationError::MissingField("tenant_id"))
        );
    }

    #[test]
    fn test_malformed_instance_rejected() {
        let err = config("login.microsoftonline.com", "common").unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidUrl { field: "instance", .. }
        ));
    }

    #[test]
    fn test_empty_scopes_rejected() {
        let err = AuthorityConfig::new(
            "https://login.microsoftonline.com/",
            "common",
            "client",
            "https://localhost",
            "https://graph.microsoft.com/v1.0/me/calendar",
            ScopeSet::parse("openid offline_access"),
        )
        .unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyScopes);
    }

    #[test]
    fn test_scope_set_is_case_insensitive() {
        let granted = ScopeSet::parse("User.Read Calendars.Read profile openid");
        let wanted = ScopeSet::parse("calendars.read");
        assert!(granted.covers(&wanted));
        assert!(!wanted.covers(&granted));
        assert_eq!(granted.to_string(), "calendars.read user.read");
    }
}
