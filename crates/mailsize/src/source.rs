//! Remote mailbox abstraction
//!
//! The sync engine only talks to the mailbox through [`MailSource`], so the
//! Gmail client can be swapped for a scripted fake in tests.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{DATE_SENTINEL, Label, MessageId, MessageMetadata};

/// Why fetching a single message's metadata failed.
///
/// Classification happens in the source adapter, so callers never have to
/// look at error text.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The message no longer exists upstream
    #[error("message not found")]
    NotFound,
    /// The source asked us to slow down
    #[error("rate limit exceeded")]
    RateLimited,
    /// Anything else
    #[error("{0:#}")]
    Other(anyhow::Error),
}

/// Filter for listing message IDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Only list messages received after this instant
    pub newer_than: Option<DateTime<Utc>>,
    /// Include messages in spam and trash
    pub include_spam_trash: bool,
}

impl ListQuery {
    /// Query for everything received since `resume_point`, in every scope.
    ///
    /// The date sentinel means "no lower bound".
    pub fn since(resume_point: DateTime<Utc>) -> Self {
        Self {
            newer_than: (resume_point > DATE_SENTINEL).then_some(resume_point),
            include_spam_trash: true,
        }
    }

    /// Render the Gmail search expression for this query, if any
    pub fn search_expression(&self) -> Option<String> {
        self.newer_than
            .map(|date| format!("after:{}", date.timestamp()))
    }
}

/// One page of message IDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    /// Continuation token; None when the listing is exhausted
    pub next_page_token: Option<String>,
}

/// Capabilities the sync engine needs from the remote mailbox
pub trait MailSource: Send + Sync {
    /// List one page of message IDs matching `query`
    fn list_message_ids(&self, query: &ListQuery, page_token: Option<&str>) -> Result<MessagePage>;

    /// Fetch the date, labels and size estimate of one message
    fn get_message_metadata(&self, id: &MessageId) -> Result<MessageMetadata, FetchError>;

    /// List every label in the mailbox
    fn list_labels(&self) -> Result<Vec<Label>>;
}
