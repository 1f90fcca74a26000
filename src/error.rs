use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum MirrorError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no credential stored for connection {0}")]
    CredentialMissing(i64),

    #[error("refresh token expired for connection {0}; reconnect required")]
    CredentialExpired(i64),

    #[error("access token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("provider fetch failed during {step}: {detail}")]
    FetchFailed { step: String, detail: String },

    #[error("OAuth2 token request error: {0}")]
    Oauth2Token(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server { error: String },

    #[error("database error: {0}")]
    Persistence(#[from] SqlxError),
}

/// Classifies errors worth another attempt. Drives `backon`'s `.when(...)`.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for MirrorError {
    fn is_retryable(&self) -> bool {
        match self {
            MirrorError::Reqwest(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            // Transport-level OAuth failures may clear up on their own;
            // a server-side rejection will not.
            MirrorError::Oauth2Token(_) => true,
            _ => false,
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for MirrorError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => MirrorError::Oauth2Server {
                error: err.error().to_string(),
            },
            RequestTokenError::Request(req_e) => {
                MirrorError::Oauth2Token(format!("request failed: {}", req_e))
            }
            RequestTokenError::Parse(parse_err, _body) => MirrorError::Json(parse_err.into_inner()),
            RequestTokenError::Other(s) => MirrorError::Oauth2Token(s),
        }
    }
}
