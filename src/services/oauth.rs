use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use super::identity::AuthError;
use crate::config::GoogleOAuthConfig;

const CONSENT_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str = "openid email profile";
const CALLBACK_PATH: &str = "/callback";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

const DONE_PAGE: &str = "<html><body><h3>Signed in to Xgpt.</h3>\
     <p>You can close this window.</p></body></html>";
const FAILED_PAGE: &str = "<html><body><h3>Sign-in failed.</h3>\
     <p>Return to Xgpt and try again.</p></body></html>";

/// A Google credential obtained through the browser, ready for Firebase.
#[derive(Debug, Clone)]
pub struct GoogleCredential {
    pub id_token: String,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Run the browser consent flow.
/// Binds a loopback server, opens the browser and waits for Google's redirect.
pub async fn run_consent_flow(
    client: &Client,
    config: &GoogleOAuthConfig,
) -> Result<GoogleCredential, AuthError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| AuthError::Loopback(format!("Failed to bind: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| AuthError::Loopback(format!("Failed to get addr: {e}")))?
        .port();

    let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
    let state = random_state();
    let url = consent_url(&config.client_id, &redirect_uri, &state)?;

    tracing::info!("Auth callback server on port {}", port);
    open::that(url.as_str())
        .map_err(|e| AuthError::Loopback(format!("Failed to open browser: {e}")))?;

    let code = tokio::time::timeout(CALLBACK_TIMEOUT, accept_callback(listener, &state))
        .await
        .map_err(|_| AuthError::Loopback("Sign-in timed out after 2 minutes".to_string()))??;

    let id_token = exchange_code(client, config, &code, &redirect_uri).await?;
    Ok(GoogleCredential {
        id_token,
        redirect_uri,
    })
}

pub fn consent_url(client_id: &str, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
    Url::parse_with_params(
        CONSENT_URL,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("state", state),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| AuthError::Loopback(e.to_string()))
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

async fn accept_callback(listener: TcpListener, state: &str) -> Result<String, AuthError> {
    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|e| AuthError::Loopback(format!("Accept failed: {e}")))?;

        let mut buffer = vec![0u8; 8192];
        let n = stream
            .read(&mut buffer)
            .await
            .map_err(|e| AuthError::Loopback(format!("Read failed: {e}")))?;
        let request = String::from_utf8_lossy(&buffer[..n]);

        // Browsers also ask for /favicon.ico and similar
        let Some(outcome) = parse_callback(&request, state) else {
            let _ = stream.write_all(not_found().as_bytes()).await;
            continue;
        };

        let page = if outcome.is_ok() { DONE_PAGE } else { FAILED_PAGE };
        let _ = stream.write_all(html_response(page).as_bytes()).await;
        return outcome;
    }
}

/// Extract the authorization code from a raw redirect request.
///
/// `None` means the request is not the callback at all.
pub fn parse_callback(request: &str, expected_state: &str) -> Option<Result<String, AuthError>> {
    let target = request
        .lines()
        .next()?
        .strip_prefix("GET ")?
        .split_whitespace()
        .next()?;
    let url = Url::parse(&format!("http://127.0.0.1{target}")).ok()?;
    if url.path() != CALLBACK_PATH {
        return None;
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = param("error") {
        return Some(Err(AuthError::Rejected(error)));
    }
    if param("state").as_deref() != Some(expected_state) {
        return Some(Err(AuthError::Rejected("State mismatch".to_string())));
    }
    Some(param("code").ok_or_else(|| AuthError::InvalidResponse("Callback without code".into())))
}

async fn exchange_code(
    client: &Client,
    config: &GoogleOAuthConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<String, AuthError> {
    let mut form = vec![
        ("code", code),
        ("client_id", config.client_id.as_str()),
        ("redirect_uri", redirect_uri),
        ("grant_type", "authorization_code"),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.as_str()));
    }

    let response = client
        .post(TOKEN_URL)
        .form(&form)
        .send()
        .await
        .map_err(|e| AuthError::NetworkError(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::NetworkError(e.to_string()))?;
    if !status.is_success() {
        return Err(AuthError::Rejected(format!("Google token endpoint: HTTP {}", status.as_u16())));
    }
    parse_token_response(&body)
}

fn parse_token_response(body: &str) -> Result<String, AuthError> {
    let tokens: TokenResponse =
        serde_json::from_str(body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    tokens
        .id_token
        .ok_or_else(|| AuthError::InvalidResponse("Google returned no id_token".into()))
}

fn html_response(page: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\r\n{}",
        page.len(),
        page
    )
}

fn not_found() -> &'static str {
    "HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_url_carries_loopback_redirect() {
        let url = consent_url("client-1", "http://127.0.0.1:4567/callback", "s1").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "client-1".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "http://127.0.0.1:4567/callback".into()
        )));
        assert!(pairs.contains(&("scope".into(), "openid email profile".into())));
        assert!(pairs.contains(&("state".into(), "s1".into())));
    }

    #[test]
    fn test_parse_callback_returns_code() {
        let request = "GET /callback?state=abc&code=4%2F0Ab HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        let code = parse_callback(request, "abc").unwrap().unwrap();
        assert_eq!(code, "4/0Ab");
    }

    #[test]
    fn test_parse_callback_rejects_bad_state_and_denial() {
        let request = "GET /callback?state=other&code=c HTTP/1.1\r\n\r\n";
        assert!(matches!(
            parse_callback(request, "abc"),
            Some(Err(AuthError::Rejected(_)))
        ));

        let request = "GET /callback?error=access_denied&state=abc HTTP/1.1\r\n\r\n";
        match parse_callback(request, "abc") {
            Some(Err(AuthError::Rejected(reason))) => assert_eq!(reason, "access_denied"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_callback_ignores_other_requests() {
        assert!(parse_callback("GET /favicon.ico HTTP/1.1\r\n\r\n", "abc").is_none());
        assert!(parse_callback("POST /callback HTTP/1.1\r\n\r\n", "abc").is_none());
        assert!(parse_callback("", "abc").is_none());
    }

    #[test]
    fn test_token_response_parsing() {
        let body = r#"{"access_token":"ya29","expires_in":3599,"scope":"openid",
            "token_type":"Bearer","id_token":"google.jwt"}"#;
        assert_eq!(parse_token_response(body).unwrap(), "google.jwt");
        assert!(matches!(
            parse_token_response(r#"{"access_token":"ya29"}"#),
            Err(AuthError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_random_state_is_unguessable_length() {
        let a = random_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, random_state());
    }
}
