//! In-memory conversation store, the test seam for the store contract.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use pcommon::{BoxFuture, ChatId, MessageId, UserId};
use pprovider::ProviderId;
use uuid::Uuid;

use crate::feed::FeedHub;
use crate::{
    ChatListFeed, ChatRecord, ConversationStore, MessageFeed, MessageRecord, OWNER_CHAT_LIMIT,
    Sender, StoreError,
};

#[derive(Default)]
struct MemoryState {
    chats: HashMap<ChatId, ChatRecord>,
    // Insertion order doubles as the timestamp tie-breaker.
    messages: Vec<MessageRecord>,
}

pub struct InMemoryConversationStore {
    state: Mutex<MemoryState>,
    feeds: FeedHub,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            feeds: FeedHub::new(),
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::storage("conversation store lock poisoned"))
    }
}

fn messages_for(state: &MemoryState, chat_id: &ChatId) -> Vec<MessageRecord> {
    let mut messages: Vec<MessageRecord> = state
        .messages
        .iter()
        .filter(|message| &message.chat_id == chat_id)
        .cloned()
        .collect();
    messages.sort_by_key(|message| message.timestamp);
    messages
}

fn chats_for(state: &MemoryState, owner: &UserId) -> Vec<ChatRecord> {
    if owner.is_anonymous() {
        return Vec::new();
    }

    let mut chats: Vec<ChatRecord> = state
        .chats
        .values()
        .filter(|chat| !chat.is_anonymous && &chat.user_id == owner)
        .cloned()
        .collect();
    chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    chats.truncate(OWNER_CHAT_LIMIT);
    chats
}

impl ConversationStore for InMemoryConversationStore {
    fn create_chat<'a>(
        &'a self,
        title: &'a str,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatId, StoreError>> {
        Box::pin(async move {
            let now = Utc::now();
            let chat = ChatRecord {
                id: ChatId::new(Uuid::new_v4().to_string()),
                title: title.to_string(),
                user_id: owner.clone(),
                ai_provider: provider,
                message_count: 0,
                last_message: None,
                is_anonymous: owner.is_anonymous(),
                created_at: now,
                updated_at: now,
            };

            let (chat_id, snapshot) = {
                let mut state = self.state()?;
                let chat_id = chat.id.clone();
                state.chats.insert(chat_id.clone(), chat);
                (chat_id, chats_for(&state, owner))
            };

            self.feeds.publish_chats(owner, snapshot)?;
            Ok(chat_id)
        })
    }

    fn append_message<'a>(
        &'a self,
        chat_id: &'a ChatId,
        text: &'a str,
        sender: Sender,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<MessageId, StoreError>> {
        Box::pin(async move {
            let now = Utc::now();
            let message = MessageRecord {
                id: MessageId::new(Uuid::new_v4().to_string()),
                chat_id: chat_id.clone(),
                text: text.to_string(),
                sender,
                ai: provider,
                user_id: owner.clone(),
                timestamp: now,
            };

            let (message_id, chat_owner, message_snapshot, chat_snapshot) = {
                let mut state = self.state()?;
                let chat = state
                    .chats
                    .get_mut(chat_id)
                    .ok_or_else(|| StoreError::not_found(format!("no chat with id {chat_id}")))?;

                chat.message_count += 1;
                chat.last_message = Some(text.to_string());
                chat.updated_at = now;
                let chat_owner = chat.user_id.clone();

                let message_id = message.id.clone();
                state.messages.push(message);

                (
                    message_id,
                    chat_owner.clone(),
                    messages_for(&state, chat_id),
                    chats_for(&state, &chat_owner),
                )
            };

            self.feeds.publish_messages(chat_id, message_snapshot)?;
            self.feeds.publish_chats(&chat_owner, chat_snapshot)?;
            Ok(message_id)
        })
    }

    fn load_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<Vec<MessageRecord>, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            Ok(messages_for(&state, chat_id))
        })
    }

    fn load_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<ChatRecord>, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            Ok(chats_for(&state, owner))
        })
    }

    fn subscribe_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<MessageFeed, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            let snapshot = messages_for(&state, chat_id);
            drop(state);
            self.feeds.subscribe_messages(chat_id, snapshot)
        })
    }

    fn subscribe_owner_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatListFeed, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            let snapshot = chats_for(&state, owner);
            drop(state);
            self.feeds.subscribe_chats(owner, snapshot)
        })
    }

    fn delete_chat<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let (owner, chat_snapshot) = {
                let mut state = self.state()?;
                // Messages go first so a concurrent reader never sees a chat
                // whose messages are unresolvable.
                state.messages.retain(|message| &message.chat_id != chat_id);
                let chat = state
                    .chats
                    .remove(chat_id)
                    .ok_or_else(|| StoreError::not_found(format!("no chat with id {chat_id}")))?;
                let owner = chat.user_id.clone();
                (owner.clone(), chats_for(&state, &owner))
            };

            self.feeds.close_messages(chat_id)?;
            self.feeds.publish_chats(&owner, chat_snapshot)?;
            Ok(())
        })
    }

    fn transfer_ownership<'a>(
        &'a self,
        old_owner: &'a UserId,
        new_owner: &'a UserId,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let now = Utc::now();
            let (transferred, chat_snapshot, message_snapshots) = {
                let mut state = self.state()?;
                let mut transferred_ids = Vec::new();

                for chat in state.chats.values_mut() {
                    if chat.is_anonymous && &chat.user_id == old_owner {
                        chat.user_id = new_owner.clone();
                        chat.is_anonymous = false;
                        chat.updated_at = now;
                        transferred_ids.push(chat.id.clone());
                    }
                }

                for message in &mut state.messages {
                    if transferred_ids.contains(&message.chat_id)
                        && &message.user_id == old_owner
                    {
                        message.user_id = new_owner.clone();
                    }
                }

                let message_snapshots: Vec<(ChatId, Vec<MessageRecord>)> = transferred_ids
                    .iter()
                    .map(|chat_id| (chat_id.clone(), messages_for(&state, chat_id)))
                    .collect();

                (
                    transferred_ids.len() as u64,
                    chats_for(&state, new_owner),
                    message_snapshots,
                )
            };

            for (chat_id, snapshot) in message_snapshots {
                self.feeds.publish_messages(&chat_id, snapshot)?;
            }

            self.feeds.publish_chats(new_owner, chat_snapshot)?;
            Ok(transferred)
        })
    }
}
