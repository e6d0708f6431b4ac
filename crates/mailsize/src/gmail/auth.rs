//! Gmail OAuth2 authentication
//!
//! Installed-app authorization code flow: the consent page redirects to a
//! short-lived listener on localhost. Tokens are cached on disk and the
//! current access token is memoised so that every worker thread shares it.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::GmailCredentials;

/// Seconds before expiry at which a token is considered stale
const EXPIRY_MARGIN_SECS: i64 = 300;

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    credentials: GmailCredentials,
    token_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

/// Token data persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at > chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read-only access is all the mirror needs
    const GMAIL_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Port range to try for the local OAuth callback listener
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Token cache file in the config directory
    const TOKEN_FILE: &'static str = "gmail-token.json";

    /// Create an authenticator caching its token in ~/.config/mailsize/
    pub fn new(credentials: GmailCredentials) -> Result<Self> {
        let token_path =
            config::config_path(Self::TOKEN_FILE).context("Could not determine config directory")?;
        Ok(Self::with_token_path(credentials, token_path))
    }

    /// Create an authenticator caching its token at an explicit path
    pub fn with_token_path(credentials: GmailCredentials, token_path: PathBuf) -> Self {
        Self {
            credentials,
            token_path,
            cached: Mutex::new(None),
        }
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow::anyhow!("Token cache lock poisoned"))?;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let stored = cached.take().or_else(|| self.load_token().ok());
        let token = self.obtain_token(stored)?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Resolve a usable token from what is on disk, falling back to consent
    fn obtain_token(&self, stored: Option<StoredToken>) -> Result<StoredToken> {
        if let Some(token) = stored {
            if token.is_fresh() {
                return Ok(token);
            }
            if let Some(refresh_token) = token.refresh_token.as_deref() {
                match self.refresh_access_token(refresh_token) {
                    Ok(response) => return self.save_token_response(response),
                    Err(e) => warn!("Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let response = self.authorization_code_auth()?;
        self.save_token_response(response)
    }

    /// Perform the authorization code flow in the user's browser
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_READONLY_SCOPE),
        );

        println!("Go to the following link in your browser to authorize mailsize:");
        println!("{}", auth_url);
        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser: {}", e);
        }

        let code = self.wait_for_callback(listener)?;

        info!("Exchanging authorization code for tokens");
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")
    }

    /// Bind the first free port in the callback range
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        (Self::PORT_RANGE_START..=Self::PORT_RANGE_END)
            .find_map(|port| {
                TcpListener::bind(("127.0.0.1", port))
                    .ok()
                    .map(|listener| (listener, port))
            })
            .with_context(|| {
                format!(
                    "Could not bind to any port in range {}-{}",
                    Self::PORT_RANGE_START,
                    Self::PORT_RANGE_END
                )
            })
    }

    /// Wait for the browser redirect and extract the authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let callback = parse_callback(&request_line);

        let (status, body) = match &callback {
            Ok(_) => ("200 OK", "Authorization complete. You can close this window."),
            Err(_) => ("400 Bad Request", "Authorization failed. Please try again."),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        callback
    }

    /// Exchange a refresh token for a new access token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_token_response(&self, token: TokenResponse) -> Result<StoredToken> {
        if let Some(parent) = self.token_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored = StoredToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };

        info!("Saving credential file to: {}", self.token_path.display());
        let content = serde_json::to_string_pretty(&stored)?;
        fs::write(&self.token_path, content)
            .with_context(|| format!("Unable to cache oauth token: {}", self.token_path.display()))?;
        Ok(stored)
    }

    /// Forget the cached token so the next run asks for consent again
    pub fn logout(&self) -> Result<()> {
        if let Ok(mut cached) = self.cached.lock() {
            cached.take();
        }
        remove_token_file(&self.token_path)?;
        Ok(())
    }

    /// Delete the default token cache without loading client credentials.
    ///
    /// Returns whether a cached token was present.
    pub fn clear_token_cache() -> Result<bool> {
        let token_path =
            config::config_path(Self::TOKEN_FILE).context("Could not determine config directory")?;
        remove_token_file(&token_path)
    }
}

fn remove_token_file(path: &std::path::Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path)
        .with_context(|| format!("Unable to remove cached token: {}", path.display()))?;
    info!("Removed cached token {}", path.display());
    Ok(true)
}

/// Extract the authorization code from the redirect's request line
/// (`GET /?code=...&scope=... HTTP/1.1`)
fn parse_callback(request_line: &str) -> Result<String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed callback request")?;
    let url = url::Url::parse("http://localhost")?
        .join(target)
        .context("Malformed callback target")?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => anyhow::bail!("OAuth error: {}", value),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }

    code.context("No authorization code received")
}
