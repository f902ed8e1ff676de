//! Push-based change feeds over `tokio::sync::watch`.
//!
//! Each topic (a chat's message list, an owner's chat list) holds one watch
//! sender; subscribing hands out a receiver carrying the full current
//! snapshot, and every mutation publishes a fresh snapshot. Dropping the
//! receiver is the unsubscribe; a topic whose last receiver is gone is pruned
//! on the next publish, so listeners cannot leak across chat switches.

use std::collections::HashMap;
use std::sync::Mutex;

use pcommon::{ChatId, UserId};
use tokio::sync::watch;

use crate::{ChatRecord, MessageRecord, StoreError};

/// Receiver of the full ordered message list for one chat.
pub type MessageFeed = watch::Receiver<Vec<MessageRecord>>;

/// Receiver of one owner's chat list, most recently updated first.
pub type ChatListFeed = watch::Receiver<Vec<ChatRecord>>;

pub(crate) struct FeedHub {
    messages: Mutex<HashMap<ChatId, watch::Sender<Vec<MessageRecord>>>>,
    chat_lists: Mutex<HashMap<UserId, watch::Sender<Vec<ChatRecord>>>>,
    // Anonymous owners share one feed that stays empty forever.
    anonymous_chats: watch::Sender<Vec<ChatRecord>>,
}

impl FeedHub {
    pub(crate) fn new() -> Self {
        let (anonymous_chats, _) = watch::channel(Vec::new());
        Self {
            messages: Mutex::new(HashMap::new()),
            chat_lists: Mutex::new(HashMap::new()),
            anonymous_chats,
        }
    }

    pub(crate) fn subscribe_messages(
        &self,
        chat_id: &ChatId,
        snapshot: Vec<MessageRecord>,
    ) -> Result<MessageFeed, StoreError> {
        let mut feeds = self
            .messages
            .lock()
            .map_err(|_| StoreError::storage("message feed lock poisoned"))?;

        if let Some(sender) = feeds.get(chat_id) {
            return Ok(sender.subscribe());
        }

        let (sender, receiver) = watch::channel(snapshot);
        feeds.insert(chat_id.clone(), sender);
        Ok(receiver)
    }

    pub(crate) fn publish_messages(
        &self,
        chat_id: &ChatId,
        snapshot: Vec<MessageRecord>,
    ) -> Result<(), StoreError> {
        let mut feeds = self
            .messages
            .lock()
            .map_err(|_| StoreError::storage("message feed lock poisoned"))?;

        if let Some(sender) = feeds.get(chat_id)
            && sender.send(snapshot).is_err()
        {
            feeds.remove(chat_id);
        }

        Ok(())
    }

    /// Close a deleted chat's feed after pushing the final empty snapshot.
    pub(crate) fn close_messages(&self, chat_id: &ChatId) -> Result<(), StoreError> {
        let mut feeds = self
            .messages
            .lock()
            .map_err(|_| StoreError::storage("message feed lock poisoned"))?;

        if let Some(sender) = feeds.remove(chat_id) {
            let _ = sender.send(Vec::new());
        }

        Ok(())
    }

    pub(crate) fn subscribe_chats(
        &self,
        owner: &UserId,
        snapshot: Vec<ChatRecord>,
    ) -> Result<ChatListFeed, StoreError> {
        if owner.is_anonymous() {
            return Ok(self.anonymous_chats.subscribe());
        }

        let mut feeds = self
            .chat_lists
            .lock()
            .map_err(|_| StoreError::storage("chat list feed lock poisoned"))?;

        if let Some(sender) = feeds.get(owner) {
            return Ok(sender.subscribe());
        }

        let (sender, receiver) = watch::channel(snapshot);
        feeds.insert(owner.clone(), sender);
        Ok(receiver)
    }

    pub(crate) fn publish_chats(
        &self,
        owner: &UserId,
        snapshot: Vec<ChatRecord>,
    ) -> Result<(), StoreError> {
        if owner.is_anonymous() {
            return Ok(());
        }

        let mut feeds = self
            .chat_lists
            .lock()
            .map_err(|_| StoreError::storage("chat list feed lock poisoned"))?;

        if let Some(sender) = feeds.get(owner)
            && sender.send(snapshot).is_err()
        {
            feeds.remove(owner);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_chat_feed_is_always_empty() {
        let hub = FeedHub::new();
        let feed = hub
            .subscribe_chats(&UserId::anonymous(), Vec::new())
            .expect("subscribe");
        assert!(feed.borrow().is_empty());

        // Publishing for an anonymous owner is a no-op.
        hub.publish_chats(&UserId::anonymous(), Vec::new())
            .expect("publish");
        assert!(feed.borrow().is_empty());
    }

    #[test]
    fn message_topic_is_pruned_after_last_receiver_drops() {
        let hub = FeedHub::new();
        let chat = ChatId::new("chat-1");

        let feed = hub
            .subscribe_messages(&chat, Vec::new())
            .expect("subscribe");
        drop(feed);

        hub.publish_messages(&chat, Vec::new()).expect("publish");
        assert!(hub.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn second_subscriber_shares_the_same_topic() {
        let hub = FeedHub::new();
        let chat = ChatId::new("chat-1");

        let first = hub
            .subscribe_messages(&chat, Vec::new())
            .expect("subscribe");
        let second = hub
            .subscribe_messages(&chat, Vec::new())
            .expect("subscribe");

        hub.publish_messages(&chat, Vec::new()).expect("publish");
        assert!(first.has_changed().expect("feed alive"));
        assert!(second.has_changed().expect("feed alive"));
    }
}
