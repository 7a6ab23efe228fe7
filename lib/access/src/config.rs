//! OAuth2 provider configuration.
//!
//! This module provides the configuration for connecting to an external
//! OAuth2 provider using the Authorization Code flow. A configuration is only
//! usable once [`OAuth2Config::validate`] accepts it; the server refuses to
//! start with an invalid one.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Configuration for the OAuth2 identity provider.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// The callback URL registered with the provider
    /// (e.g., "https://app.example.com/oauth2/callback").
    redirect_url: String,
    /// The provider's authorization endpoint.
    auth_url: String,
    /// The provider's token endpoint.
    token_url: String,
    /// The provider's userinfo endpoint
    /// (e.g., "https://graph.microsoft.com/v1.0/me?$select=displayName,mail").
    userinfo_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// Optional URL whose scheme and host replace those of `redirect_url`.
    /// Useful when the externally visible origin differs, e.g. in tests.
    #[serde(default)]
    redirect_origin: Option<String>,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

impl OAuth2Config {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(client_id: String, client_secret: String) -> OAuth2ConfigBuilder {
        OAuth2ConfigBuilder::new(client_id, client_secret)
    }

    /// Returns the configured callback URL.
    #[must_use]
    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Returns the authorization endpoint.
    #[must_use]
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    /// Returns the token endpoint.
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Returns the userinfo endpoint.
    #[must_use]
    pub fn userinfo_url(&self) -> &str {
        &self.userinfo_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns the redirect origin override, if any.
    #[must_use]
    pub fn redirect_origin(&self) -> Option<&str> {
        self.redirect_origin.as_deref()
    }

    /// Checks that every field is present and every URL parses.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, in field declaration order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("redirect_url", &self.redirect_url)?;
        require_url("auth_url", &self.auth_url)?;
        require_url("token_url", &self.token_url)?;
        require_url("userinfo_url", &self.userinfo_url)?;
        require_str("client_id", &self.client_id)?;
        require_str("client_secret", &self.client_secret)?;
        if self.scopes().is_empty() {
            return Err(ConfigError::MissingScopes);
        }
        Ok(())
    }

    /// Returns the callback URL with the redirect origin override applied.
    ///
    /// An override that does not parse is ignored. Only a non-empty scheme
    /// and host (with port) are taken from it.
    ///
    /// # Errors
    ///
    /// Returns an error if `redirect_url` itself does not parse.
    pub fn effective_redirect_url(&self) -> Result<Url, ConfigError> {
        let mut url = parse_url("redirect_url", &self.redirect_url)?;
        if let Some(origin) = self
            .redirect_origin
            .as_deref()
            .and_then(|o| Url::parse(o.trim()).ok())
        {
            // set_scheme refuses special/non-special switches; keep the original then.
            let _ = url.set_scheme(origin.scheme());
            if let Some(host) = origin.host_str() {
                if url.set_host(Some(host)).is_ok() {
                    let _ = url.set_port(origin.port());
                }
            }
        }
        Ok(url)
    }
}

fn require_str(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField { field });
    }
    Ok(())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    require_str(field, value)?;
    Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })
}

fn require_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    parse_url(field, value).map(|_| ())
}

/// Builder for `OAuth2Config`.
#[derive(Debug)]
pub struct OAuth2ConfigBuilder {
    redirect_url: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    redirect_origin: Option<String>,
}

impl OAuth2ConfigBuilder {
    /// Creates a new builder with the client credentials.
    #[must_use]
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            redirect_url: String::new(),
            auth_url: String::new(),
            token_url: String::new(),
            userinfo_url: String::new(),
            client_id,
            client_secret,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            redirect_origin: None,
        }
    }

    /// Sets the callback URL.
    #[must_use]
    pub fn redirect_url(mut self, url: String) -> Self {
        self.redirect_url = url;
        self
    }

    /// Sets the authorization endpoint.
    #[must_use]
    pub fn auth_url(mut self, url: String) -> Self {
        self.auth_url = url;
        self
    }

    /// Sets the token endpoint.
    #[must_use]
    pub fn token_url(mut self, url: String) -> Self {
        self.token_url = url;
        self
    }

    /// Sets the userinfo endpoint.
    #[must_use]
    pub fn userinfo_url(mut self, url: String) -> Self {
        self.userinfo_url = url;
        self
    }

    /// Sets the OAuth2 scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the redirect origin override.
    #[must_use]
    pub fn redirect_origin(mut self, origin: String) -> Self {
        self.redirect_origin = Some(origin);
        self
    }

    /// Builds and validates the `OAuth2Config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing, a URL does not parse, or no
    /// scopes are set.
    pub fn build(self) -> turnstile_core::Result<OAuth2Config, ConfigError> {
        let config = OAuth2Config {
            redirect_url: self.redirect_url,
            auth_url: self.auth_url,
            token_url: self.token_url,
            userinfo_url: self.userinfo_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            scopes: self.scopes.join(","),
            redirect_origin: self.redirect_origin,
        };
        config.validate()?;
        Ok(config)
    }
}
