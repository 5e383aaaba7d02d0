//! Ordered, deduplicated view of the loaded messages of one conversation.
//!
//! Every mutation is idempotent with respect to entry identity, which is
//! what lets the loader, the change feed and local sends all write into the
//! same store while requests are in flight.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::entry::{Entry, EntryId, EntryPatch};

/// Entries sorted by `created_at` ascending; ties keep insertion order.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    entries: VecDeque<Entry>,
    ids: HashSet<EntryId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.position(id).map(|i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn oldest(&self) -> Option<&Entry> {
        self.entries.front()
    }

    pub fn newest(&self) -> Option<&Entry> {
        self.entries.back()
    }

    /// Entries whose local send is still unacknowledged.
    pub fn pending(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.id.is_provisional())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// Append an entry.  No-op (returns `false`) if its id is already present.
    ///
    /// An entry older than the current tail is seated at its ordered
    /// position instead, so the ascending invariant survives clock skew.
    pub fn insert_tail(&mut self, entry: Entry) -> bool {
        if !self.ids.insert(entry.id) {
            return false;
        }
        match self.entries.back() {
            Some(last) if entry.created_at < last.created_at => {
                debug!(id = %entry.id, "insert_tail out of order, seating by timestamp");
                let at = self.upper_bound(entry.created_at);
                self.entries.insert(at, entry);
            }
            _ => self.entries.push_back(entry),
        }
        true
    }

    /// Prepend a batch of older history received newest-first.
    ///
    /// The batch is re-ordered ascending and ids already present (e.g. pushed
    /// by the change feed meanwhile) are dropped.  Returns how many entries
    /// were actually added.
    pub fn insert_head_batch<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut fresh: Vec<Entry> = batch.into_iter().collect();
        fresh.reverse();
        fresh.sort_by_key(|e| e.created_at);
        fresh.retain(|e| self.ids.insert(e.id));

        let added = fresh.len();
        let fits_before_head = match (fresh.last(), self.entries.front()) {
            (Some(last), Some(head)) => last.created_at <= head.created_at,
            _ => true,
        };

        if fits_before_head {
            for entry in fresh.into_iter().rev() {
                self.entries.push_front(entry);
            }
        } else {
            debug!(added, "head batch overlaps loaded window, merging");
            for entry in fresh {
                let at = self.upper_bound(entry.created_at);
                self.entries.insert(at, entry);
            }
        }
        added
    }

    /// Merge `fields` into an existing entry.
    ///
    /// Returns `false` without touching anything when `id` is absent, which
    /// happens when an update overtakes the corresponding insert.
    /// `created_at` is immutable here; only [`replace_id`](Self::replace_id)
    /// re-stamps it.
    pub fn patch(&mut self, id: &EntryId, mut fields: EntryPatch) -> bool {
        let Some(i) = self.position(id) else {
            debug!(id = %id, "patch for unknown entry ignored");
            return false;
        };
        fields.created_at = None;
        fields.apply(&mut self.entries[i]);
        true
    }

    /// Remove an entry.  Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &EntryId) -> Option<Entry> {
        let i = self.position(id)?;
        self.ids.remove(id);
        self.entries.remove(i)
    }

    /// Give an entry a new identity and merge `fields`, keeping its slot.
    ///
    /// Refuses (returns `false`) when `old` is absent or `new` is already
    /// present, so a promotion can never create a duplicate.  If the merged
    /// `created_at` no longer fits between its neighbours the entry is moved
    /// to its ordered slot.
    pub fn replace_id(&mut self, old: &EntryId, new: EntryId, fields: EntryPatch) -> bool {
        if old == &new || self.ids.contains(&new) {
            return false;
        }
        let Some(i) = self.position(old) else {
            return false;
        };

        self.ids.remove(old);
        self.ids.insert(new);
        let entry = &mut self.entries[i];
        entry.id = new;
        fields.apply(entry);

        if !self.in_order_at(i) {
            if let Some(entry) = self.entries.remove(i) {
                let at = self.upper_bound(entry.created_at);
                self.entries.insert(at, entry);
            }
        }
        true
    }

    fn position(&self, id: &EntryId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        // Recent entries are the common target; scan from the tail.
        self.entries.iter().rposition(|e| &e.id == id)
    }

    /// Index after the last entry stamped at or before `ts`.
    fn upper_bound(&self, ts: DateTime<Utc>) -> usize {
        self.entries.partition_point(|e| e.created_at <= ts)
    }

    fn in_order_at(&self, i: usize) -> bool {
        let ts = self.entries[i].created_at;
        let after_prev = i == 0 || self.entries[i - 1].created_at <= ts;
        let before_next = self
            .entries
            .get(i + 1)
            .map_or(true, |next| ts <= next.created_at);
        after_prev && before_next
    }
}
