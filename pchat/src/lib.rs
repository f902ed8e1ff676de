//! Session orchestration: one controller drives the send-message turn, chat
//! activation, and feed hand-off for a single user session.
//!
//! The controller is deliberately thin over its three collaborators. The
//! store owns persistence and feeds, the registry owns provider adapters,
//! and the identity resolver owns who the session belongs to. What lives
//! here is the turn protocol: exactly one user message and one AI message
//! per accepted send, a cooperative in-flight guard, and the rule that
//! anonymous exchanges never touch the store.

mod error;

pub use error::{SessionError, SessionErrorKind};

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use pcommon::{ChatId, MessageId, UserId};
use pidentity::IdentityResolver;
use pprovider::{CompletionRequest, ProviderId, ProviderRegistry};
use pstore::{ChatListFeed, ChatRecord, ConversationStore, MessageFeed, MessageRecord, Sender};
use uuid::Uuid;

/// Chat titles derive from the first message, cut to this many characters.
const TITLE_MAX_CHARS: usize = 50;

/// Synthetic chat id for the anonymous in-memory transcript.
const ANONYMOUS_CHAT_ID: &str = "anonymous-session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Whitespace-only input, dropped without side effects.
    Ignored,
    /// A send was already in flight.
    Busy,
    Sent,
}

struct SessionState {
    session_owner: UserId,
    selected_provider: ProviderId,
    selected_model: Option<String>,
    active_chat: Option<ChatId>,
    message_feed: Option<MessageFeed>,
    chat_list: Option<(UserId, ChatListFeed)>,
    anonymous_transcript: Vec<MessageRecord>,
    sending: bool,
}

pub struct SessionController {
    store: Arc<dyn ConversationStore>,
    providers: Arc<ProviderRegistry>,
    identity: Arc<IdentityResolver>,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        providers: Arc<ProviderRegistry>,
        identity: Arc<IdentityResolver>,
    ) -> Self {
        let session_owner = identity.current().uid;
        Self {
            store,
            providers,
            identity,
            state: Mutex::new(SessionState {
                session_owner,
                selected_provider: ProviderId::ChatGpt,
                selected_model: None,
                active_chat: None,
                message_feed: None,
                chat_list: None,
                anonymous_transcript: Vec::new(),
                sending: false,
            }),
        }
    }

    /// Run one conversation turn. An accepted send appends exactly one user
    /// message and one AI message; a provider failure becomes the AI message
    /// text rather than a send failure.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, SessionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let identity = self.identity.current();
        self.reconcile_identity(&identity)?;

        let (provider, model, active_chat) = {
            let mut state = self.state()?;
            if state.sending {
                return Ok(SendOutcome::Busy);
            }
            state.sending = true;
            (
                state.selected_provider,
                state.selected_model.clone(),
                state.active_chat.clone(),
            )
        };
        let _guard = SendingGuard { state: &self.state };

        let adapter = self.providers.get(provider).ok_or_else(|| {
            SessionError::provider(format!("Unsupported AI provider: {provider}"))
        })?;
        let mut request = CompletionRequest::new(trimmed);
        if let Some(model) = model {
            request = request.with_model(model);
        }

        if identity.is_anonymous {
            self.push_transcript(trimmed, Sender::User, provider, &identity.uid)?;
            let reply_text = match adapter.complete(request).await {
                Ok(reply) => reply.text,
                Err(error) => {
                    tracing::warn!(provider = %provider, error = %error, "provider call failed");
                    error.message
                }
            };
            self.push_transcript(&reply_text, Sender::Ai, provider, &identity.uid)?;
            return Ok(SendOutcome::Sent);
        }

        // A failed chat creation aborts the whole send; nothing is appended.
        let chat_id = match active_chat {
            Some(chat_id) => chat_id,
            None => {
                let chat_id = self
                    .store
                    .create_chat(&derive_title(trimmed), provider, &identity.uid)
                    .await?;
                let feed = self.store.subscribe_messages(&chat_id).await?;
                let mut state = self.state()?;
                state.active_chat = Some(chat_id.clone());
                state.message_feed = Some(feed);
                chat_id
            }
        };

        self.store
            .append_message(&chat_id, trimmed, Sender::User, provider, &identity.uid)
            .await?;

        let reply_text = match adapter.complete(request).await {
            Ok(reply) => reply.text,
            Err(error) => {
                tracing::warn!(provider = %provider, error = %error, "provider call failed");
                error.message
            }
        };

        self.store
            .append_message(&chat_id, &reply_text, Sender::Ai, provider, &identity.uid)
            .await?;

        Ok(SendOutcome::Sent)
    }

    /// Activate a chat, swapping the message feed to the new topic. The old
    /// receiver drops with the swap, which is the unsubscribe.
    pub async fn select_chat(&self, chat_id: ChatId) -> Result<(), SessionError> {
        let identity = self.identity.current();
        self.reconcile_identity(&identity)?;

        let feed = self.store.subscribe_messages(&chat_id).await?;
        let mut state = self.state()?;
        state.active_chat = Some(chat_id);
        state.message_feed = Some(feed);
        Ok(())
    }

    /// Return to the no-active-chat state; the next send creates a chat.
    pub fn start_new_chat(&self) -> Result<(), SessionError> {
        let mut state = self.state()?;
        state.active_chat = None;
        state.message_feed = None;
        state.anonymous_transcript.clear();
        Ok(())
    }

    /// Delete a chat. Deleting the active chat returns the session to the
    /// no-active-chat state.
    pub async fn delete_chat(&self, chat_id: &ChatId) -> Result<(), SessionError> {
        self.store.delete_chat(chat_id).await?;
        let mut state = self.state()?;
        if state.active_chat.as_ref() == Some(chat_id) {
            state.active_chat = None;
            state.message_feed = None;
        }
        Ok(())
    }

    /// Switch provider. The model selection belongs to the provider, so it
    /// resets with the switch.
    pub fn set_provider(&self, provider: ProviderId) -> Result<(), SessionError> {
        let mut state = self.state()?;
        if state.selected_provider != provider {
            state.selected_provider = provider;
            state.selected_model = None;
        }
        Ok(())
    }

    pub fn set_model(&self, model: impl Into<String>) -> Result<(), SessionError> {
        let model = model.into();
        let mut state = self.state()?;
        state.selected_model = if model.trim().is_empty() {
            None
        } else {
            Some(model)
        };
        Ok(())
    }

    pub fn provider(&self) -> Result<ProviderId, SessionError> {
        Ok(self.state()?.selected_provider)
    }

    pub fn model(&self) -> Result<Option<String>, SessionError> {
        Ok(self.state()?.selected_model.clone())
    }

    pub fn active_chat(&self) -> Result<Option<ChatId>, SessionError> {
        Ok(self.state()?.active_chat.clone())
    }

    /// Current message list: the in-memory transcript for anonymous
    /// sessions, the active chat's history otherwise.
    pub async fn messages(&self) -> Result<Vec<MessageRecord>, SessionError> {
        let identity = self.identity.current();
        self.reconcile_identity(&identity)?;

        if identity.is_anonymous {
            return Ok(self.state()?.anonymous_transcript.clone());
        }

        let active = self.state()?.active_chat.clone();
        match active {
            Some(chat_id) => Ok(self.store.load_messages(&chat_id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// The owner's chat list, subscribing (or re-subscribing after an
    /// identity change) to the owner-chat feed.
    pub async fn chats(&self) -> Result<Vec<ChatRecord>, SessionError> {
        let identity = self.identity.current();
        self.reconcile_identity(&identity)?;

        let needs_subscribe = {
            let state = self.state()?;
            !matches!(&state.chat_list, Some((owner, _)) if owner == &identity.uid)
        };
        if needs_subscribe {
            let feed = self.store.subscribe_owner_chats(&identity.uid).await?;
            let mut state = self.state()?;
            state.chat_list = Some((identity.uid.clone(), feed));
        }

        let state = self.state()?;
        Ok(state
            .chat_list
            .as_ref()
            .map(|(_, feed)| feed.borrow().clone())
            .unwrap_or_default())
    }

    /// Watch the active chat's messages, if a chat is active.
    pub fn message_feed(&self) -> Result<Option<MessageFeed>, SessionError> {
        Ok(self.state()?.message_feed.clone())
    }

    /// Drop per-identity session state when the active identity changed
    /// underneath the controller.
    fn reconcile_identity(&self, identity: &pidentity::Identity) -> Result<(), SessionError> {
        let mut state = self.state()?;
        if state.session_owner != identity.uid {
            state.session_owner = identity.uid.clone();
            state.active_chat = None;
            state.message_feed = None;
            state.chat_list = None;
            state.anonymous_transcript.clear();
        }
        Ok(())
    }

    fn push_transcript(
        &self,
        text: &str,
        sender: Sender,
        provider: ProviderId,
        owner: &UserId,
    ) -> Result<(), SessionError> {
        let record = MessageRecord {
            id: MessageId::new(Uuid::new_v4().to_string()),
            chat_id: ChatId::new(ANONYMOUS_CHAT_ID),
            text: text.to_string(),
            sender,
            ai: provider,
            user_id: owner.clone(),
            timestamp: Utc::now(),
        };
        self.state()?.anonymous_transcript.push(record);
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        self.state
            .lock()
            .map_err(|_| SessionError::internal("session state lock poisoned"))
    }
}

struct SendingGuard<'a> {
    state: &'a Mutex<SessionState>,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.sending = false;
        }
    }
}

fn derive_title(message: &str) -> String {
    let title: String = message.chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        "New Chat".to_string()
    } else {
        title
    }
}
