//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication flow with an on-disk token cache
//! - Gmail API client implementing [`crate::source::MailSource`]

mod auth;
mod client;

pub use auth::GmailAuth;
pub use client::{GmailClient, classify_failure};

/// Gmail API response types
pub mod api {
    use serde::Deserialize;

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
    }

    /// Reference to a listed message
    #[derive(Debug, Deserialize)]
    pub struct MessageRef {
        pub id: String,
    }

    /// Message restricted to `internalDate,labelIds,sizeEstimate`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageFields {
        /// Milliseconds since epoch, as a decimal string
        pub internal_date: Option<String>,
        pub label_ids: Option<Vec<String>>,
        pub size_estimate: Option<i64>,
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<GmailLabel>>,
    }

    /// Label as returned by the API
    #[derive(Debug, Deserialize)]
    pub struct GmailLabel {
        pub id: String,
        pub name: String,
    }

    /// Error envelope returned with non-2xx responses
    #[derive(Debug, Deserialize)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub message: Option<String>,
        #[serde(default)]
        pub errors: Vec<ErrorDetail>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorDetail {
        pub reason: Option<String>,
    }
}
