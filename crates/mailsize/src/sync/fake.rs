//! Scripted mail source for unit tests

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{Label, MessageId, MessageMetadata};
use crate::source::{FetchError, ListQuery, MailSource, MessagePage};

/// Canned response for one metadata fetch
#[derive(Debug, Clone)]
pub enum Reply {
    Found(MessageMetadata),
    NotFound,
    RateLimited,
    Broken(&'static str),
}

#[derive(Default)]
pub struct FakeSource {
    pages: Vec<Vec<MessageId>>,
    labels: Vec<Label>,
    fail_listing: bool,
    /// Replies per id, consumed front to back; the last one repeats
    replies: Mutex<HashMap<MessageId, Vec<Reply>>>,
    queries: Mutex<Vec<ListQuery>>,
    fetches: Mutex<Vec<MessageId>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, pages: Vec<Vec<&str>>) -> Self {
        self.pages = pages
            .into_iter()
            .map(|page| page.into_iter().map(MessageId::new).collect())
            .collect();
        self
    }

    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_list_failure(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn with_replies(self, id: &str, replies: Vec<Reply>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(MessageId::new(id), replies);
        self
    }

    pub fn queries(&self) -> Vec<ListQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<MessageId> {
        self.fetches.lock().unwrap().clone()
    }
}

impl MailSource for FakeSource {
    fn list_message_ids(&self, query: &ListQuery, page_token: Option<&str>) -> Result<MessagePage> {
        self.queries.lock().unwrap().push(query.clone());
        if self.fail_listing {
            bail!("listing unavailable");
        }

        let index: usize = page_token.map(|t| t.parse()).transpose()?.unwrap_or(0);
        let ids = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    fn get_message_metadata(&self, id: &MessageId) -> Result<MessageMetadata, FetchError> {
        self.fetches.lock().unwrap().push(id.clone());

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(id) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => Reply::NotFound,
            }
        };

        match reply {
            Reply::Found(metadata) => Ok(metadata),
            Reply::NotFound => Err(FetchError::NotFound),
            Reply::RateLimited => Err(FetchError::RateLimited),
            Reply::Broken(msg) => Err(FetchError::Other(anyhow::anyhow!(msg))),
        }
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        Ok(self.labels.clone())
    }
}
