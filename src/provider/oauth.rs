use crate::config::ProviderConfig;
use crate::error::MirrorError;
use crate::provider::{AuthProvider, TokenGrant};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, ExtraTokenFields, RedirectUrl, RefreshToken,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Refresh responses may carry a rotation horizon for the refresh token itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(super) struct MirrorTokenField {
    #[serde(rename = "refresh_token_expires_in")]
    pub refresh_token_expires_in: Option<u64>,
}
impl ExtraTokenFields for MirrorTokenField {}

pub(super) type MirrorTokenResponse = StandardTokenResponse<MirrorTokenField, BasicTokenType>;

pub(super) type MirrorOauth2Client = OAuth2Client<
    BasicErrorResponse,
    MirrorTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Client for the delegated-auth provider's authorize/exchange/refresh surface.
///
/// Refresh traffic is rate limited; a burst of near-expiry connections must not
/// hammer the token endpoint.
pub struct DelegatedAuthClient {
    oauth2: MirrorOauth2Client,
    http: reqwest::Client,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl DelegatedAuthClient {
    pub fn new(cfg: &ProviderConfig) -> Result<Self, MirrorError> {
        let oauth2 = OAuth2Client::new(ClientId::new(cfg.client_id.clone()))
            .set_client_secret(ClientSecret::new(cfg.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(cfg.auth_url.as_str().to_string())?)
            .set_token_uri(TokenUrl::new(cfg.token_url.as_str().to_string())?)
            .set_redirect_uri(RedirectUrl::new(cfg.redirect_url.as_str().to_string())?);

        let http = reqwest::Client::builder()
            .user_agent("netmirror/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.timeout())
            .build()?;

        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(
            std::num::NonZeroU32::new(10).unwrap(),
        )));

        Ok(Self {
            oauth2,
            http,
            limiter,
        })
    }

    fn grant_from(token: MirrorTokenResponse, now: DateTime<Utc>) -> TokenGrant {
        let expires_in = token
            .expires_in()
            .unwrap_or_else(|| Duration::from_secs(3600));
        let refresh_expires_at = token
            .extra_fields()
            .refresh_token_expires_in
            .map(|secs| now + ChronoDuration::seconds(secs as i64));

        TokenGrant {
            access_token: token.access_token().secret().clone(),
            expires_at: now + ChronoDuration::from_std(expires_in).unwrap_or(ChronoDuration::zero()),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            refresh_expires_at,
        }
    }
}

#[async_trait]
impl AuthProvider for DelegatedAuthClient {
    fn authorize_url(&self, state: &str) -> Url {
        let state = state.to_string();
        let (url, _csrf) = self
            .oauth2
            .authorize_url(move || CsrfToken::new(state.clone()))
            .url();
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MirrorError> {
        let token = self
            .oauth2
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await?;
        debug!("authorization code exchanged");
        Ok(Self::grant_from(token, Utc::now()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, MirrorError> {
        self.limiter.until_ready().await;
        let token = self
            .oauth2
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await?;
        debug!("access token refreshed against provider");
        Ok(Self::grant_from(token, Utc::now()))
    }
}
