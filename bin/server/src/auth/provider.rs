//! Transport to the OAuth2 identity provider.
//!
//! The login flow talks to the provider through [`IdentityProvider`], which
//! covers the three provider interactions: building the authorization URL,
//! exchanging the code, and fetching userinfo. [`OAuth2Provider`] is the real
//! implementation on top of the `oauth2` crate and `reqwest`.

use async_trait::async_trait;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EmptyExtraTokenFields,
    EndpointNotSet, EndpointSet, RedirectUrl, Scope, StandardTokenResponse, TokenResponse,
    TokenUrl,
    basic::{BasicClient, BasicTokenType},
};
use std::fmt;
use std::time::Duration;
use tracing::instrument;
use turnstile_access::OAuth2Config;

use crate::error::SetupError;

/// Maximum number of userinfo body bytes read from the provider.
pub const MAX_USERINFO_BYTES: usize = 32 * 1024;

/// Type alias for the token response type.
type ProviderTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

/// A `BasicClient` with the authorization and token endpoints set.
type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Result of a successful code exchange.
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Raw userinfo response, body truncated to [`MAX_USERINFO_BYTES`].
#[derive(Debug, Clone)]
pub struct UserinfoResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Provider transport errors.
#[derive(Debug)]
pub enum ProviderError {
    /// The token endpoint rejected the code or could not be reached.
    TokenExchange { details: String },
    /// The userinfo request could not be sent or its body not read.
    Userinfo { details: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenExchange { details } => write!(f, "token exchange failed: {}", details),
            Self::Userinfo { details } => write!(f, "userinfo request failed: {}", details),
        }
    }
}

impl std::error::Error for ProviderError {}

/// The provider operations used by the login flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the URL to send the browser to, carrying `state` and
    /// requesting offline access.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for a token.
    async fn exchange_code(
        &self,
        code: &str,
    ) -> turnstile_core::Result<ProviderToken, ProviderError>;

    /// Fetches the userinfo resource with `access_token` as bearer credential.
    ///
    /// Non-200 statuses are returned, not treated as errors.
    async fn fetch_userinfo(
        &self,
        access_token: &str,
    ) -> turnstile_core::Result<UserinfoResponse, ProviderError>;
}

/// Identity provider backed by the `oauth2` crate.
#[derive(Debug, Clone)]
pub struct OAuth2Provider {
    client: ConfiguredClient,
    http: reqwest::Client,
    userinfo_url: String,
    scopes: Vec<String>,
}

impl OAuth2Provider {
    /// Creates a provider from a validated configuration.
    ///
    /// The redirect origin override, if set, is applied to the redirect URL.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        config: &OAuth2Config,
        timeout: Duration,
    ) -> turnstile_core::Result<Self, SetupError> {
        let redirect_url = config.effective_redirect_url().map_err(invalid_config)?;
        let client = BasicClient::new(ClientId::new(config.client_id().to_string()))
            .set_client_secret(ClientSecret::new(config.client_secret().to_string()))
            .set_auth_uri(AuthUrl::new(config.auth_url().to_string()).map_err(invalid_config)?)
            .set_token_uri(
                TokenUrl::new(config.token_url().to_string()).map_err(invalid_config)?,
            )
            .set_redirect_uri(
                RedirectUrl::new(redirect_url.to_string()).map_err(invalid_config)?,
            );

        // The token endpoint must not be allowed to redirect the code elsewhere.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| SetupError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            http,
            userinfo_url: config.userinfo_url().to_string(),
            scopes: config.scopes().into_iter().map(str::to_string).collect(),
        })
    }
}

fn invalid_config(e: impl fmt::Display) -> SetupError {
    SetupError::InvalidConfig {
        details: e.to_string(),
    }
}

#[async_trait]
impl IdentityProvider for OAuth2Provider {
    fn authorization_url(&self, state: &str) -> String {
        let state = state.to_string();
        let mut request = self.client.authorize_url(move || CsrfToken::new(state));
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, _) = request.add_extra_param("access_type", "offline").url();
        url.to_string()
    }

    #[instrument(skip(self, code))]
    async fn exchange_code(
        &self,
        code: &str,
    ) -> turnstile_core::Result<ProviderToken, ProviderError> {
        let token: ProviderTokenResponse = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::TokenExchange {
                details: e.to_string(),
            })?;

        Ok(ProviderToken {
            access_token: token.access_token().secret().clone(),
            token_type: token.token_type().as_ref().to_string(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_in: token.expires_in(),
        })
    }

    #[instrument(skip(self, access_token), fields(url = %self.userinfo_url))]
    async fn fetch_userinfo(
        &self,
        access_token: &str,
    ) -> turnstile_core::Result<UserinfoResponse, ProviderError> {
        let mut response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Userinfo {
                details: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| ProviderError::Userinfo {
            details: e.to_string(),
        })? {
            let remaining = MAX_USERINFO_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if body.len() >= MAX_USERINFO_BYTES {
                tracing::warn!(limit = MAX_USERINFO_BYTES, "userinfo body truncated");
                break;
            }
        }

        tracing::debug!(status, bytes = body.len(), "fetched userinfo");
        Ok(UserinfoResponse { status, body })
    }
}
