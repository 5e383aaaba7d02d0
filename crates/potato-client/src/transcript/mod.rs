//! The read model of one open conversation: ordered entries plus the
//! backward-pagination cursor.

mod cursor;
mod entry;
mod store;

pub use cursor::PageCursor;
pub use entry::{DeliveryState, Entry, EntryId, EntryPatch};
pub use store::MessageStore;
