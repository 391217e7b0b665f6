use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::keyring::{KeyringService, Secret};
use super::oauth::{self, GoogleCredential};
use crate::config::GoogleOAuthConfig;
use crate::models::User;

const TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
const LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";
const SIGN_IN_WITH_IDP_URL: &str =
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp";
const GOOGLE_PROVIDER_ID: &str = "google.com";

/// Refresh this long before the ID token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No stored Google sign-in was found and no OAuth client is configured")]
    NoCredential,

    #[error("Browser sign-in failed: {0}")]
    Loopback(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Sign-in rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of the signed-in user and of bearer tokens for the document store.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resume a previous sign-in without user interaction, if one exists.
    async fn restore(&self) -> Result<Option<User>, AuthError>;

    async fn sign_in(&self) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// A currently valid ID token for the signed-in user.
    async fn id_token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdpRequest {
    post_body: String,
    request_uri: String,
    return_secure_token: bool,
    return_idp_credential: bool,
}

impl SignInWithIdpRequest {
    fn for_google(credential: &GoogleCredential) -> Self {
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", &credential.id_token)
            .append_pair("providerId", GOOGLE_PROVIDER_ID)
            .finish();
        Self {
            post_body,
            request_uri: credential.redirect_uri.clone(),
            return_secure_token: true,
            return_idp_credential: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdpResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    local_id: String,
    display_name: Option<String>,
    email: Option<String>,
    photo_url: Option<String>,
}

impl SignInWithIdpResponse {
    fn into_session(self) -> Result<AuthSession, AuthError> {
        let lifetime = parse_lifetime(&self.expires_in)?;
        Ok(AuthSession {
            user: User {
                uid: self.local_id,
                display_name: self.display_name,
                email: self.email,
                photo_url: self.photo_url,
            },
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

fn parse_lifetime(expires_in: &str) -> Result<Duration, AuthError> {
    expires_in
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| AuthError::InvalidResponse(format!("expires_in={}", expires_in)))
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    display_name: Option<String>,
    email: Option<String>,
    photo_url: Option<String>,
}

impl AccountInfo {
    fn into_user(self) -> User {
        User {
            uid: self.local_id,
            display_name: self.display_name,
            email: self.email,
            photo_url: self.photo_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
struct AuthSession {
    user: User,
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

impl AuthSession {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

/// Firebase Auth over REST.
///
/// A new sign-in goes through Google in the browser; the resulting refresh
/// token is kept in the keyring so later launches restore it silently.
pub struct FirebaseIdentity {
    client: Client,
    api_key: String,
    oauth: Option<GoogleOAuthConfig>,
    keyring: Option<KeyringService>,
    session: Mutex<Option<AuthSession>>,
}

impl FirebaseIdentity {
    pub fn new(
        api_key: String,
        oauth: Option<GoogleOAuthConfig>,
        keyring: Option<KeyringService>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            oauth,
            keyring,
            session: Mutex::new(None),
        }
    }

    async fn persist_refresh_token(&self, refresh_token: &str) {
        let Some(keyring) = &self.keyring else {
            tracing::warn!("Keyring unavailable, sign-in will not survive a restart");
            return;
        };
        if let Err(e) = keyring
            .store(Secret::FirebaseRefreshToken, refresh_token)
            .await
        {
            tracing::warn!("Could not persist refresh token: {:#}", e);
        }
    }

    async fn sign_in_with_google(
        &self,
        credential: &GoogleCredential,
    ) -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(SIGN_IN_WITH_IDP_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&SignInWithIdpRequest::for_google(credential))
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        let signed_in: SignInWithIdpResponse = Self::read_json(response).await?;
        let session = signed_in.into_session()?;
        self.persist_refresh_token(&session.refresh_token).await;
        Ok(session)
    }

    async fn stored_refresh_token(&self) -> Result<Option<String>, AuthError> {
        let Some(keyring) = &self.keyring else {
            return Ok(None);
        };
        keyring
            .retrieve(Secret::FirebaseRefreshToken)
            .await
            .map_err(|e| AuthError::Keyring(format!("{:#}", e)))
    }

    async fn exchange(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(TOKEN_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
            })
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        let tokens: RefreshResponse = Self::read_json(response).await?;

        let lifetime = parse_lifetime(&tokens.expires_in)?;

        let user = self.lookup(&tokens.id_token).await?;
        if user.uid != tokens.user_id {
            return Err(AuthError::InvalidResponse(
                "Token and profile belong to different users".to_string(),
            ));
        }

        if tokens.refresh_token != refresh_token {
            self.persist_refresh_token(&tokens.refresh_token).await;
        }

        Ok(AuthSession {
            user,
            id_token: tokens.id_token,
            refresh_token: tokens.refresh_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    async fn lookup(&self, id_token: &str) -> Result<User, AuthError> {
        let response = self
            .client
            .post(LOOKUP_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&LookupRequest { id_token })
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        let lookup: LookupResponse = Self::read_json(response).await?;
        lookup
            .users
            .into_iter()
            .next()
            .map(AccountInfo::into_user)
            .ok_or_else(|| AuthError::InvalidResponse("Account lookup returned no user".into()))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AuthError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::Rejected(Self::error_message(status, &body)));
        }
        serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    fn error_message(status: reqwest::StatusCode, body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()))
    }

    async fn start_session(&self) -> Result<Option<User>, AuthError> {
        let Some(refresh_token) = self.stored_refresh_token().await? else {
            return Ok(None);
        };
        let session = self.exchange(&refresh_token).await?;
        let user = session.user.clone();
        *self.session.lock().await = Some(session);
        tracing::info!("Signed in as {}", user.label());
        Ok(Some(user))
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn restore(&self) -> Result<Option<User>, AuthError> {
        if let Some(session) = self.session.lock().await.as_ref() {
            return Ok(Some(session.user.clone()));
        }
        self.start_session().await
    }

    async fn sign_in(&self) -> Result<User, AuthError> {
        if let Some(user) = self.start_session().await? {
            return Ok(user);
        }
        let Some(client_config) = &self.oauth else {
            return Err(AuthError::NoCredential);
        };

        let credential = oauth::run_consent_flow(&self.client, client_config).await?;
        let session = self.sign_in_with_google(&credential).await?;
        let user = session.user.clone();
        *self.session.lock().await = Some(session);
        tracing::info!("Signed in as {}", user.label());
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.lock().await.take();
        if let Some(keyring) = &self.keyring {
            keyring
                .delete(Secret::FirebaseRefreshToken)
                .await
                .map_err(|e| AuthError::Keyring(format!("{:#}", e)))?;
        }
        tracing::info!("Signed out");
        Ok(())
    }

    async fn id_token(&self) -> Result<String, AuthError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(AuthError::NotSignedIn)?;
        if !session.is_fresh() {
            tracing::debug!("Refreshing expired ID token");
            let refresh_token = session.refresh_token.clone();
            *session = self.exchange(&refresh_token).await?;
        }
        Ok(session.id_token.clone())
    }
}
