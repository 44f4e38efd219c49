//! Backwards paging through a channel's messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contempt_proto::{Message, Snowflake};
use parking_lot::Mutex;
use tracing::debug;

use super::client::{HttpClient, MessageQuery};
use crate::error::{ClientError, Result};

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u8 = 50;

#[derive(Default)]
struct Loaded {
    /// Oldest first.
    messages: Vec<Message>,
    exhausted: bool,
}

/// Loaded history of one channel, oldest message first.
///
/// The first [`load_older`](Self::load_older) fetches the newest page; each
/// later call fetches the page before the oldest message held. A page that
/// is empty or shorter than the page size marks the start of the channel.
/// Only one load runs at a time; a concurrent call fails with
/// [`ClientError::LoadInProgress`].
pub struct MessageHistory {
    http: Arc<HttpClient>,
    channel: Snowflake,
    page_size: u8,
    loading: AtomicBool,
    loaded: Mutex<Loaded>,
}

struct LoadGuard<'a>(&'a AtomicBool);

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MessageHistory {
    /// Empty history of `channel`.
    #[must_use]
    pub fn new(http: Arc<HttpClient>, channel: Snowflake) -> Self {
        Self {
            http,
            channel,
            page_size: DEFAULT_PAGE_SIZE,
            loading: AtomicBool::new(false),
            loaded: Mutex::new(Loaded::default()),
        }
    }

    /// Use pages of `page_size` messages.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u8) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Channel this history belongs to.
    #[must_use]
    pub const fn channel(&self) -> Snowflake {
        self.channel
    }

    /// Every loaded message, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.loaded.lock().messages.clone()
    }

    /// Whether the start of the channel has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.loaded.lock().exhausted
    }

    /// Whether a load is running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Fetch the page before the oldest loaded message and return it,
    /// oldest first. Returns an empty page once exhausted.
    pub async fn load_older(&self) -> Result<Vec<Message>> {
        let _guard = self.begin_load()?;

        let (before, exhausted) = {
            let loaded = self.loaded.lock();
            (loaded.messages.first().map(|m| m.id), loaded.exhausted)
        };
        if exhausted {
            return Ok(Vec::new());
        }

        let mut query = MessageQuery::latest(self.page_size);
        if let Some(before) = before {
            query = query.before(before);
        }
        let mut page = self.http.fetch_messages(self.channel, query).await?;
        page.reverse();

        let mut loaded = self.loaded.lock();
        loaded.exhausted = page.len() < usize::from(self.page_size);
        let mut messages = page.clone();
        messages.append(&mut loaded.messages);
        loaded.messages = messages;
        debug!(
            channel = %self.channel,
            page = page.len(),
            total = loaded.messages.len(),
            exhausted = loaded.exhausted,
            "loaded history page"
        );
        Ok(page)
    }

    /// Append a message that arrived live, unless it is already held.
    pub fn push(&self, message: Message) {
        if message.channel_id != self.channel {
            return;
        }
        let mut loaded = self.loaded.lock();
        if !loaded.messages.iter().any(|m| m.id == message.id) {
            loaded.messages.push(message);
        }
    }

    fn begin_load(&self) -> Result<LoadGuard<'_>> {
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::LoadInProgress)?;
        Ok(LoadGuard(&self.loading))
    }
}

impl std::fmt::Debug for MessageHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded = self.loaded.lock();
        f.debug_struct("MessageHistory")
            .field("channel", &self.channel)
            .field("page_size", &self.page_size)
            .field("loaded", &loaded.messages.len())
            .field("exhausted", &loaded.exhausted)
            .finish_non_exhaustive()
    }
}
