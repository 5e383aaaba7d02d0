use chrono::{DateTime, Utc};

/// Backward pagination state for one conversation.
///
/// The boundary only ever moves back in time, and `has_more` flips to
/// `false` the first time a page comes back short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    oldest_loaded: Option<DateTime<Utc>>,
    has_more: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCursor {
    /// Nothing loaded yet: the next fetch is the "most recent page".
    pub fn new() -> Self {
        Self {
            oldest_loaded: None,
            has_more: true,
        }
    }

    /// Cursor after the first page of `batch_size` messages.
    pub fn from_first_page(
        oldest: Option<DateTime<Utc>>,
        batch_size: usize,
        page_size: u32,
    ) -> Self {
        let mut cursor = Self::new();
        cursor.advance(oldest, batch_size, page_size);
        cursor
    }

    pub fn oldest_loaded(&self) -> Option<DateTime<Utc>> {
        self.oldest_loaded
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Exclusive upper bound for the next backward fetch.
    pub fn next_before(&self) -> Option<DateTime<Utc>> {
        self.oldest_loaded
    }

    /// Record a fetched batch.  `oldest` is the oldest timestamp in the raw
    /// batch (before any deduplication against the store).
    pub fn advance(&mut self, oldest: Option<DateTime<Utc>>, batch_size: usize, page_size: u32) {
        if let Some(ts) = oldest {
            self.oldest_loaded = Some(match self.oldest_loaded {
                Some(current) => current.min(ts),
                None => ts,
            });
        }
        self.has_more = batch_size > 0 && batch_size == page_size as usize;
    }
}
