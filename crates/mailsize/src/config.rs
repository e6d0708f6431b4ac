//! OAuth client credentials for Gmail access
//!
//! Looked up, in order of priority, from:
//! 1. An explicit JSON file (Google Cloud Console format)
//! 2. `client_secret.json` in the mailsize config directory
//! 3. `client_secret.json` in the working directory
//! 4. `GMAIL_CLIENT_ID` / `GMAIL_CLIENT_SECRET` environment variables

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Client secret filename, as downloaded from Google Cloud Console
pub const CREDENTIALS_FILE: &str = "client_secret.json";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials, preferring `explicit` when given
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            if let Some(path) = Self::default_credentials_path() {
                return Self::from_file(&path);
            }
        }

        let local = Path::new(CREDENTIALS_FILE);
        if local.exists() {
            return Self::from_file(local);
        }

        Self::from_env()
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)
            .context("Unable to read client secret file")?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        let section = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
        })
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("No client secret file found and GMAIL_CLIENT_ID is not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("No client secret file found and GMAIL_CLIENT_SECRET is not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Default credentials path (~/.config/mailsize/client_secret.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{"web": {"client_id": "web-id", "client_secret": "web-secret"}}"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-id");
    }

    #[test]
    fn test_missing_section() {
        assert!(GmailCredentials::from_json(r#"{ "other": {} }"#).is_err());
    }

    #[test]
    fn test_explicit_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(
            &path,
            r#"{"installed": {"client_id": "file-id", "client_secret": "file-secret"}}"#,
        )
        .unwrap();

        let creds = GmailCredentials::load(Some(&path)).unwrap();
        assert_eq!(creds.client_id, "file-id");
        assert_eq!(creds.client_secret, "file-secret");
    }
}
