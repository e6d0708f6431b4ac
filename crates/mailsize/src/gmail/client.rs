//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq) so each enrichment worker can block on its
//! own request.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::GmailAuth;
use super::api::{ErrorResponse, ListLabelsResponse, ListMessagesResponse, MessageFields};
use crate::models::{Label, LabelId, MessageId, MessageMetadata};
use crate::source::{FetchError, ListQuery, MailSource, MessagePage};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the list endpoint accepts
    const PAGE_SIZE: usize = 500;

    /// Fields requested when enriching a message
    const METADATA_FIELDS: &'static str = "internalDate,labelIds,sizeEstimate";

    pub fn new(auth: GmailAuth) -> Self {
        Self { auth }
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.get_access_token()?))
    }

    /// Build the list URL for one page of `query`
    fn list_url(query: &ListQuery, page_token: Option<&str>) -> String {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}&includeSpamTrash={}",
            Self::BASE_URL,
            Self::PAGE_SIZE,
            query.include_spam_trash
        );

        if let Some(q) = query.search_expression() {
            url.push_str(&format!("&q={}", urlencoding::encode(&q)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        url
    }
}

impl MailSource for GmailClient {
    fn list_message_ids(&self, query: &ListQuery, page_token: Option<&str>) -> Result<MessagePage> {
        let url = Self::list_url(query, page_token);

        let mut response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Unable to retrieve messages")?;

        let list: ListMessagesResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")?;

        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn get_message_metadata(&self, id: &MessageId) -> Result<MessageMetadata, FetchError> {
        let url = format!(
            "{}/users/me/messages/{}?format=minimal&fields={}",
            Self::BASE_URL,
            urlencoding::encode(id.as_str()),
            urlencoding::encode(Self::METADATA_FIELDS)
        );

        let mut response = ureq::get(&url)
            .config()
            .http_status_as_error(false)
            .build()
            .header("Authorization", &self.bearer().map_err(FetchError::Other)?)
            .call()
            .map_err(|e| FetchError::Other(anyhow::Error::new(e).context("Failed to send get message request")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let fields: MessageFields = response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")
            .map_err(FetchError::Other)?;

        to_metadata(fields).map_err(FetchError::Other)
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        let url = format!("{}/users/me/labels", Self::BASE_URL);

        let mut response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Unable to retrieve labels")?;

        let list: ListLabelsResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse labels response")?;

        Ok(list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| Label::new(l.id, l.name))
            .collect())
    }
}

/// Map a non-success HTTP response to a [`FetchError`].
///
/// Gmail reports quota exhaustion either as 429 or as 403 with a
/// rate-limit reason in the error body.
pub fn classify_failure(status: u16, body: &str) -> FetchError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|r| {
            r.error
                .errors
                .iter()
                .filter_map(|e| e.reason.as_deref())
                .collect()
        })
        .unwrap_or_default();

    match status {
        404 => FetchError::NotFound,
        429 => FetchError::RateLimited,
        403 if reasons
            .iter()
            .any(|r| matches!(*r, "rateLimitExceeded" | "userRateLimitExceeded")) =>
        {
            FetchError::RateLimited
        }
        _ => {
            let message = parsed
                .and_then(|r| r.error.message)
                .unwrap_or_else(|| body.trim().to_string());
            FetchError::Other(anyhow::anyhow!(
                "Gmail API returned {}: {}",
                status,
                message
            ))
        }
    }
}

/// Convert the restricted API message into domain metadata
fn to_metadata(fields: MessageFields) -> Result<MessageMetadata> {
    let millis: i64 = match fields.internal_date.as_deref() {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid internalDate: {}", raw))?,
        None => 0,
    };
    let internal_date = DateTime::<Utc>::from_timestamp_millis(millis)
        .with_context(|| format!("internalDate out of range: {}", millis))?;

    Ok(MessageMetadata {
        internal_date,
        label_ids: fields
            .label_ids
            .unwrap_or_default()
            .into_iter()
            .map(LabelId::new)
            .collect(),
        size_estimate: fields.size_estimate.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_classify_not_found() {
        let body = r#"{"error": {"code": 404, "message": "Requested entity was not found.", "errors": [{"reason": "notFound"}]}}"#;
        assert!(matches!(classify_failure(404, body), FetchError::NotFound));
    }

    #[test]
    fn test_classify_too_many_requests() {
        assert!(matches!(classify_failure(429, ""), FetchError::RateLimited));
    }

    #[test]
    fn test_classify_forbidden_rate_limit() {
        let body = r#"{"error": {"code": 403, "message": "User Rate Limit Exceeded", "errors": [{"reason": "userRateLimitExceeded"}]}}"#;
        assert!(matches!(classify_failure(403, body), FetchError::RateLimited));
    }

    #[test]
    fn test_classify_forbidden_other() {
        let body = r#"{"error": {"code": 403, "message": "Insufficient Permission", "errors": [{"reason": "insufficientPermissions"}]}}"#;
        match classify_failure(403, body) {
            FetchError::Other(e) => assert!(e.to_string().contains("Insufficient Permission")),
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_error_plain_body() {
        match classify_failure(500, "backend unavailable\n") {
            FetchError::Other(e) => {
                assert_eq!(e.to_string(), "Gmail API returned 500: backend unavailable")
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_to_metadata() {
        let fields: MessageFields = serde_json::from_str(
            r#"{"internalDate": "1709294400000", "labelIds": ["INBOX", "UNREAD"], "sizeEstimate": 4521}"#,
        )
        .unwrap();

        let metadata = to_metadata(fields).unwrap();
        assert_eq!(
            metadata.internal_date,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            metadata.label_ids,
            vec![LabelId::new("INBOX"), LabelId::new("UNREAD")]
        );
        assert_eq!(metadata.size_estimate, 4521);
    }

    #[test]
    fn test_to_metadata_rejects_bad_date() {
        let fields: MessageFields = serde_json::from_str(r#"{"internalDate": "soon"}"#).unwrap();
        assert!(to_metadata(fields).is_err());
    }

    #[test]
    fn test_list_response_reads_only_ids() {
        let list: ListMessagesResponse = serde_json::from_str(
            r#"{"messages": [{"id": "18c1", "threadId": "18c0"}, {"id": "18c2", "threadId": "18c0"}],
                "nextPageToken": "abc", "resultSizeEstimate": 201}"#,
        )
        .unwrap();

        let ids: Vec<String> = list.messages.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["18c1", "18c2"]);
        assert_eq!(list.next_page_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_list_url() {
        let query = ListQuery::since(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let url = GmailClient::list_url(&query, Some("next"));
        assert_eq!(
            url,
            "https://gmail.googleapis.com/gmail/v1/users/me/messages?maxResults=500&includeSpamTrash=true&q=after%3A1704153600&pageToken=next"
        );
    }
}
