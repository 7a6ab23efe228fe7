//! Test doubles for the login flow.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use turnstile_access::OAuth2Config;

use super::flow::{AuthServer, AuthServerBuilder};
use super::provider::{IdentityProvider, ProviderError, ProviderToken, UserinfoResponse};

pub(crate) const AUTHORIZE_URL: &str = "https://idp.example.com/authorize";

/// Provider that answers from canned responses.
pub(crate) struct FakeProvider {
    userinfo: Mutex<UserinfoResponse>,
    fail_exchange: AtomicBool,
    exchanges: AtomicUsize,
}

impl FakeProvider {
    pub(crate) fn with_userinfo(userinfo: Value) -> Arc<Self> {
        Arc::new(Self {
            userinfo: Mutex::new(UserinfoResponse {
                status: 200,
                body: userinfo.to_string().into_bytes(),
            }),
            fail_exchange: AtomicBool::new(false),
            exchanges: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_userinfo_response(&self, status: u16, body: &str) {
        *self.userinfo.lock().expect("lock") = UserinfoResponse {
            status,
            body: body.as_bytes().to_vec(),
        };
    }

    pub(crate) fn fail_exchange(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }

    pub(crate) fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorization_url(&self, state: &str) -> String {
        format!("{AUTHORIZE_URL}?state={state}&access_type=offline")
    }

    async fn exchange_code(
        &self,
        code: &str,
    ) -> turnstile_core::Result<ProviderToken, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(ProviderError::TokenExchange {
                details: "invalid_grant".to_string(),
            }
            .into());
        }
        Ok(ProviderToken {
            access_token: format!("token-for-{code}"),
            token_type: "bearer".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: Some(Duration::from_secs(3600)),
        })
    }

    async fn fetch_userinfo(
        &self,
        _access_token: &str,
    ) -> turnstile_core::Result<UserinfoResponse, ProviderError> {
        Ok(self.userinfo.lock().expect("lock").clone())
    }
}

pub(crate) fn test_config() -> OAuth2Config {
    OAuth2Config::builder("client-id".to_string(), "client-secret".to_string())
        .redirect_url("https://example.com/oauth2/callback".to_string())
        .auth_url(AUTHORIZE_URL.to_string())
        .token_url("https://idp.example.com/token".to_string())
        .userinfo_url("https://idp.example.com/userinfo".to_string())
        .build()
        .expect("valid config")
}

pub(crate) fn builder_with(provider: Arc<FakeProvider>) -> AuthServerBuilder {
    AuthServer::builder()
        .oauth2(Some(test_config()))
        .provider(provider)
}

/// Extracts the `state` query value from a provider redirect.
pub(crate) fn state_from_location(location: &str) -> String {
    location
        .split_once("state=")
        .and_then(|(_, rest)| rest.split('&').next())
        .expect("state in location")
        .to_string()
}
