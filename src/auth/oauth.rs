//! Azure AD v2 identity provider: refresh-token silent flow and device code
//! interactive flow

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use oauth2::basic::{
    BasicErrorResponseType, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, ClientId, DeviceAuthorizationUrl, DeviceCodeErrorResponse,
    DeviceCodeErrorResponseType, ErrorResponse, ExtraTokenFields, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, StandardDeviceAuthorizationResponse, StandardRevocableToken,
    StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{
    AccountIdentity, AuthorityConfig, IdentityProvider, ScopeSet, SilentOutcome, TokenGrant,
    RESERVED_SCOPES,
};
use crate::error::{AuthError, ConfigurationError};

/// AAD error codes meaning the user must sign in again or consent.
const INTERACTION_ERRORS: [&str; 4] = [
    "interaction_required",
    "consent_required",
    "login_required",
    "invalid_grant",
];

/// Token endpoint error body, including AAD's `suberror` and `claims`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AadErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suberror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<String>,
}

impl AadErrorResponse {
    pub fn requires_interaction(&self) -> bool {
        INTERACTION_ERRORS.contains(&self.error.as_str())
    }
}

impl fmt::Display for AadErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(ref sub) = self.suberror {
            write!(f, " ({})", sub)?;
        }
        if let Some(ref desc) = self.error_description {
            // AAD descriptions carry trace ids on following lines
            write!(f, ": {}", desc.lines().next().unwrap_or_default())?;
        }
        Ok(())
    }
}

impl ErrorResponse for AadErrorResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type AadTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type AadClient = oauth2::Client<
    AadErrorResponse,
    AadTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    tid: Option<String>,
    name: Option<String>,
    preferred_username: Option<String>,
}

struct CachedAccount {
    identity: AccountIdentity,
    refresh_token: String,
}

/// Public-client Azure AD provider. Accounts and refresh tokens are held in
/// memory only.
pub struct AadProvider {
    client: AadClient,
    accounts: Mutex<Vec<CachedAccount>>,
}

impl AadProvider {
    pub fn new(authority: &AuthorityConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: build_client(authority)?,
            accounts: Mutex::new(Vec::new()),
        })
    }

    /// Remember the refresh token for the grant's account, most recent first.
    async fn remember(&self, account: &AccountIdentity, refresh_token: Option<String>) {
        let Some(refresh_token) = refresh_token else {
            tracing::debug!("No refresh token issued; silent renewal will not be possible");
            return;
        };
        let mut accounts = self.accounts.lock().await;
        accounts.retain(|c| c.identity.id != account.id);
        accounts.insert(
            0,
            CachedAccount {
                identity: account.clone(),
                refresh_token,
            },
        );
    }
}

/// Build the OAuth2 client from an AuthorityConfig
fn build_client(authority: &AuthorityConfig) -> Result<AadClient, ConfigurationError> {
    let invalid = |field: &'static str| {
        move |e: url::ParseError| ConfigurationError::InvalidUrl {
            field,
            reason: e.to_string(),
        }
    };

    let auth_url = AuthUrl::new(authority.authorize_url()).map_err(invalid("instance"))?;
    let token_url = TokenUrl::new(authority.token_url()).map_err(invalid("instance"))?;
    let device_url =
        DeviceAuthorizationUrl::new(authority.device_code_url()).map_err(invalid("instance"))?;
    let redirect_url =
        RedirectUrl::new(authority.redirect_target.clone()).map_err(invalid("redirect_uri"))?;

    Ok(AadClient::new(
        ClientId::new(authority.client_id.clone()),
        None,
        auth_url,
        Some(token_url),
    )
    .set_device_authorization_url(device_url)
    .set_redirect_uri(redirect_url))
}

/// Requested scopes plus the OIDC scopes needed for an id_token and a
/// refresh token.
fn request_scopes(scopes: &ScopeSet) -> Vec<Scope> {
    scopes
        .iter()
        .chain(RESERVED_SCOPES)
        .map(|s| Scope::new(s.to_string()))
        .collect()
}

/// Decode the account from an id_token payload. The signature is not
/// checked; the token came straight from the token endpoint over TLS.
fn account_from_id_token(id_token: &str) -> Option<AccountIdentity> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;

    let object_id = claims.oid.or(claims.sub)?;
    let id = match claims.tid {
        Some(tid) => format!("{}.{}", object_id, tid),
        None => object_id,
    };
    let display_name = claims
        .name
        .or(claims.preferred_username)
        .unwrap_or_else(|| id.clone());
    Some(AccountIdentity { id, display_name })
}

/// Turn a token response into a grant. `fallback` is used when the response
/// carries no id_token (refresh responses may omit it).
fn grant_from_response(
    response: &AadTokenResponse,
    requested: &ScopeSet,
    fallback: Option<&AccountIdentity>,
) -> Result<TokenGrant, AuthError> {
    let account = response
        .extra_fields()
        .id_token
        .as_deref()
        .and_then(account_from_id_token)
        .or_else(|| fallback.cloned())
        .ok_or_else(|| AuthError::ProviderRejected("token response has no id_token".into()))?;

    // An omitted `scope` means the requested scopes were granted.
    let granted = match response.scopes() {
        Some(scopes) => scopes.iter().map(|s| s.as_str()).collect(),
        None => requested.clone(),
    };

    Ok(TokenGrant::new(
        response.access_token().secret().to_string(),
        response.expires_in().map(|d| d.as_secs()),
        granted,
        account,
    ))
}

fn device_code_error(
    err: RequestTokenError<impl std::error::Error + 'static, DeviceCodeErrorResponse>,
) -> AuthError {
    match err {
        RequestTokenError::ServerResponse(resp) => match resp.error() {
            DeviceCodeErrorResponseType::AccessDenied | DeviceCodeErrorResponseType::ExpiredToken => {
                AuthError::UserCancelled
            }
            DeviceCodeErrorResponseType::Basic(BasicErrorResponseType::Extension(code))
                if code == "authorization_declined" || code == "bad_verification_code" =>
            {
                AuthError::UserCancelled
            }
            _ => AuthError::ProviderRejected(resp.to_string()),
        },
        RequestTokenError::Request(e) => AuthError::Network(e.to_string()),
        RequestTokenError::Parse(e, _) => AuthError::ProviderRejected(e.to_string()),
        RequestTokenError::Other(msg) => AuthError::ProviderRejected(msg),
    }
}

fn refresh_error(
    err: RequestTokenError<impl std::error::Error + 'static, AadErrorResponse>,
) -> AuthError {
    match err {
        RequestTokenError::ServerResponse(resp) if resp.requires_interaction() => {
            tracing::info!("Silent refresh needs interaction: {}", resp);
            AuthError::InteractiveRequired {
                claims: resp.claims,
            }
        }
        RequestTokenError::ServerResponse(resp) => AuthError::ProviderRejected(resp.to_string()),
        RequestTokenError::Request(e) => AuthError::SilentFailed(e.to_string()),
        RequestTokenError::Parse(e, _) => {
            AuthError::SilentFailed(format!("unparsable response: {}", e))
        }
        RequestTokenError::Other(msg) => AuthError::SilentFailed(msg),
    }
}

#[async_trait]
impl IdentityProvider for AadProvider {
    async fn accounts(&self) -> Vec<AccountIdentity> {
        self.accounts
            .lock()
            .await
            .iter()
            .map(|c| c.identity.clone())
            .collect()
    }

    async fn acquire_silent(
        &self,
        account: Option<&AccountIdentity>,
        scopes: &ScopeSet,
    ) -> SilentOutcome {
        let Some(account) = account else {
            tracing::debug!("No cached account");
            return SilentOutcome::NeedsInteractive { claims: None };
        };
        let refresh_token = {
            let accounts = self.accounts.lock().await;
            accounts
                .iter()
                .find(|c| c.identity.id == account.id)
                .map(|c| c.refresh_token.clone())
        };
        let Some(refresh_token) = refresh_token else {
            return SilentOutcome::NeedsInteractive { claims: None };
        };

        tracing::info!("Refreshing token for {}...", account.display_name);

        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .add_scopes(request_scopes(scopes))
            .request_async(oauth2::reqwest::async_http_client)
            .await;

        match response {
            Ok(response) => match grant_from_response(&response, scopes, Some(account)) {
                Ok(grant) => {
                    let rotated = response.refresh_token().map(|rt| rt.secret().to_string());
                    self.remember(&grant.account, rotated).await;
                    SilentOutcome::Silent(grant)
                }
                Err(e) => SilentOutcome::Failed(e),
            },
            Err(e) => refresh_error(e).into(),
        }
    }

    async fn acquire_interactive(
        &self,
        scopes: &ScopeSet,
        claims: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        tracing::info!("Initiating device code flow...");

        let mut request = self
            .client
            .exchange_device_code()
            .map_err(|e| AuthError::ProviderRejected(e.to_string()))?
            .add_scopes(request_scopes(scopes));
        if let Some(claims) = claims {
            request = request.add_extra_param("claims", claims.to_string());
        }

        let details: StandardDeviceAuthorizationResponse = request
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(resp) => {
                    AuthError::ProviderRejected(resp.to_string())
                }
                RequestTokenError::Request(e) => AuthError::Network(e.to_string()),
                RequestTokenError::Parse(e, _) => AuthError::ProviderRejected(e.to_string()),
                RequestTokenError::Other(msg) => AuthError::ProviderRejected(msg),
            })?;

        println!();
        println!("To sign in, visit: {}", details.verification_uri().as_str());
        println!("Enter code:        {}", details.user_code().secret());
        println!();

        tracing::info!("Waiting for authentication...");

        let poll = self
            .client
            .exchange_device_access_token(&details)
            .request_async(oauth2::reqwest::async_http_client, tokio::time::sleep, None);

        let response = tokio::select! {
            result = poll => result.map_err(device_code_error)?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Sign-in cancelled");
                return Err(AuthError::UserCancelled);
            }
        };

        let grant = grant_from_response(&response, scopes, None)?;
        let refresh_token = response.refresh_token().map(|rt| rt.secret().to_string());
        self.remember(&grant.account, refresh_token).await;
        Ok(grant)
    }
}
