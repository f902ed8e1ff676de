//! Conversation persistence for the palaver chat backend.
//!
//! The [`ConversationStore`] trait is the seam between the session layer and
//! storage. Two implementations ship: [`InMemoryConversationStore`] for tests
//! and anonymous-only deployments, and [`SqliteConversationStore`] for
//! durable single-node persistence. Both push full snapshots through watch
//! channels so callers observe changes without polling.
//!
//! ```rust
//! use pcommon::UserId;
//! use pprovider::ProviderId;
//! use pstore::{ConversationStore, InMemoryConversationStore, Sender};
//!
//! # async fn example() -> Result<(), pstore::StoreError> {
//! let store = InMemoryConversationStore::new();
//! let owner = UserId::from("user-1");
//! let chat = store.create_chat("Hello", ProviderId::Claude, &owner).await?;
//! store
//!     .append_message(&chat, "Hello", Sender::User, ProviderId::Claude, &owner)
//!     .await?;
//! assert_eq!(store.load_messages(&chat).await?.len(), 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod feed;
mod memory;
mod sqlite;
mod types;

pub use error::{StoreError, StoreErrorKind};
pub use feed::{ChatListFeed, MessageFeed};
pub use memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;
pub use types::{ChatRecord, MessageRecord, Sender};

use pcommon::{BoxFuture, ChatId, MessageId, UserId};
use pprovider::ProviderId;

/// Chat lists are capped at the most recently updated thirty entries.
pub const OWNER_CHAT_LIMIT: usize = 30;

/// Storage seam for chats and messages.
///
/// Implementations assign ids and timestamps, keep each chat's counters in
/// step with its messages, and publish a fresh snapshot to the matching feed
/// after every mutation. Anonymous owners never receive a populated chat
/// list; their feed stays empty.
pub trait ConversationStore: Send + Sync {
    /// Create an empty chat owned by `owner` and return its id.
    fn create_chat<'a>(
        &'a self,
        title: &'a str,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatId, StoreError>>;

    /// Append one message and bump the chat's counters atomically.
    fn append_message<'a>(
        &'a self,
        chat_id: &'a ChatId,
        text: &'a str,
        sender: Sender,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<MessageId, StoreError>>;

    /// Full message history for one chat, oldest first.
    fn load_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<Vec<MessageRecord>, StoreError>>;

    /// The owner's chats, most recently updated first, capped at
    /// [`OWNER_CHAT_LIMIT`]. Empty for anonymous owners.
    fn load_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<ChatRecord>, StoreError>>;

    /// Subscribe to a chat's message list. The receiver starts at the current
    /// snapshot; dropping it unsubscribes.
    fn subscribe_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<MessageFeed, StoreError>>;

    /// Subscribe to an owner's chat list. Anonymous owners get a feed that
    /// never updates.
    fn subscribe_owner_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatListFeed, StoreError>>;

    /// Delete a chat and all its messages, closing the chat's message feed.
    fn delete_chat<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Reassign every anonymous chat of `old_owner` to `new_owner`, clearing
    /// the anonymous flag. Returns the number of chats moved; calling again
    /// finds nothing left to move and returns zero.
    fn transfer_ownership<'a>(
        &'a self,
        old_owner: &'a UserId,
        new_owner: &'a UserId,
    ) -> BoxFuture<'a, Result<u64, StoreError>>;
}
