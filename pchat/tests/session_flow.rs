use std::sync::{Arc, Mutex};

use pchat::{SendOutcome, SessionController, SessionErrorKind};
use pcommon::{BoxFuture, ChatId, MessageId, UserId};
use pidentity::IdentityResolver;
use pprovider::{
    CompletionReply, CompletionRequest, ProviderAdapter, ProviderError, ProviderFuture,
    ProviderId, ProviderRegistry,
};
use pstore::{
    ChatListFeed, ConversationStore, InMemoryConversationStore, MessageFeed, Sender, StoreError,
};
use tokio::sync::Notify;

struct ScriptedAdapter {
    provider: ProviderId,
    outcome: Mutex<Result<String, ProviderError>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedAdapter {
    fn replying(provider: ProviderId, text: &str) -> Self {
        Self {
            provider,
            outcome: Mutex::new(Ok(text.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(provider: ProviderId, error: ProviderError) -> Self {
        Self {
            provider,
            outcome: Mutex::new(Err(error)),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            let model = request.model_for(self.provider);
            self.requests.lock().expect("requests lock").push(request);
            match self.outcome.lock().expect("outcome lock").clone() {
                Ok(text) => Ok(CompletionReply {
                    provider: self.provider,
                    model,
                    text,
                }),
                Err(error) => Err(error),
            }
        })
    }
}

/// Adapter that parks inside `complete` until released, so a second send can
/// observe the in-flight guard.
struct GatedAdapter {
    provider: ProviderId,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ProviderAdapter for GatedAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn complete<'a>(
        &'a self,
        _request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(CompletionReply {
                provider: self.provider,
                model: self.provider.default_model().to_string(),
                text: "gated reply".to_string(),
            })
        })
    }
}

/// Store whose chat creation always fails; everything else delegates.
struct BrokenCreateStore {
    inner: InMemoryConversationStore,
}

impl ConversationStore for BrokenCreateStore {
    fn create_chat<'a>(
        &'a self,
        _title: &'a str,
        _provider: ProviderId,
        _owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatId, StoreError>> {
        Box::pin(async move { Err(StoreError::storage("chat creation unavailable")) })
    }

    fn append_message<'a>(
        &'a self,
        chat_id: &'a ChatId,
        text: &'a str,
        sender: Sender,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<MessageId, StoreError>> {
        self.inner
            .append_message(chat_id, text, sender, provider, owner)
    }

    fn load_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<Vec<pstore::MessageRecord>, StoreError>> {
        self.inner.load_messages(chat_id)
    }

    fn load_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<pstore::ChatRecord>, StoreError>> {
        self.inner.load_chats(owner)
    }

    fn subscribe_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<MessageFeed, StoreError>> {
        self.inner.subscribe_messages(chat_id)
    }

    fn subscribe_owner_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatListFeed, StoreError>> {
        self.inner.subscribe_owner_chats(owner)
    }

    fn delete_chat<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.delete_chat(chat_id)
    }

    fn transfer_ownership<'a>(
        &'a self,
        old_owner: &'a UserId,
        new_owner: &'a UserId,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        self.inner.transfer_ownership(old_owner, new_owner)
    }
}

struct Harness {
    store: Arc<InMemoryConversationStore>,
    identity: Arc<IdentityResolver>,
    controller: SessionController,
}

fn harness(adapter: impl ProviderAdapter + 'static) -> Harness {
    let store: Arc<InMemoryConversationStore> = Arc::new(InMemoryConversationStore::new());
    let identity = Arc::new(IdentityResolver::new(store.clone()));
    let mut registry = ProviderRegistry::new();
    registry.register(adapter);
    let controller =
        SessionController::new(store.clone(), Arc::new(registry), identity.clone());
    Harness {
        store,
        identity,
        controller,
    }
}

#[tokio::test]
async fn whitespace_input_is_silently_ignored() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "hi"));
    let outcome = h.controller.send_message("   \n\t ").await.expect("send");
    assert_eq!(outcome, SendOutcome::Ignored);
    assert!(h.controller.messages().await.expect("messages").is_empty());
}

#[tokio::test]
async fn anonymous_send_stays_in_memory() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "hello there"));

    let outcome = h.controller.send_message("hello").await.expect("send");
    assert_eq!(outcome, SendOutcome::Sent);

    let messages = h.controller.messages().await.expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[1].sender, Sender::Ai);
    assert_eq!(messages[1].text, "hello there");

    // Nothing was persisted and no chat list exists for the anonymous owner.
    assert!(h.controller.chats().await.expect("chats").is_empty());
    assert!(h.controller.active_chat().expect("active").is_none());
}

#[tokio::test]
async fn authenticated_send_creates_a_chat_with_a_derived_title() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));
    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    let long_message = "a".repeat(80);
    let outcome = h.controller.send_message(&long_message).await.expect("send");
    assert_eq!(outcome, SendOutcome::Sent);

    let chats = h.controller.chats().await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].title.chars().count(), 50);
    assert_eq!(chats[0].message_count, 2);

    let messages = h.controller.messages().await.expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[1].sender, Sender::Ai);
    assert_eq!(messages[1].text, "reply");
}

#[tokio::test]
async fn second_send_reuses_the_active_chat() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));
    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    h.controller.send_message("first").await.expect("send");
    h.controller.send_message("second").await.expect("send");

    let chats = h.controller.chats().await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].message_count, 4);
}

#[tokio::test]
async fn provider_failure_becomes_the_ai_message() {
    let h = harness(ScriptedAdapter::failing(
        ProviderId::ChatGpt,
        ProviderError::unavailable("Failed to get response from ChatGPT"),
    ));
    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    let outcome = h.controller.send_message("hello").await.expect("send");
    assert_eq!(outcome, SendOutcome::Sent);

    let messages = h.controller.messages().await.expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].sender, Sender::Ai);
    assert_eq!(messages[1].text, "Failed to get response from ChatGPT");
}

#[tokio::test]
async fn chat_creation_failure_aborts_the_send() {
    let store = Arc::new(BrokenCreateStore {
        inner: InMemoryConversationStore::new(),
    });
    let identity = Arc::new(IdentityResolver::new(store.clone()));
    let mut registry = ProviderRegistry::new();
    registry.register(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));
    let controller = SessionController::new(store.clone(), Arc::new(registry), identity.clone());

    identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    let error = controller
        .send_message("hello")
        .await
        .expect_err("send must fail");
    assert_eq!(error.kind, SessionErrorKind::Storage);
    assert!(controller.active_chat().expect("active").is_none());
    assert!(controller.messages().await.expect("messages").is_empty());
}

#[tokio::test]
async fn concurrent_send_is_rejected_by_the_busy_guard() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let h = harness(GatedAdapter {
        provider: ProviderId::ChatGpt,
        entered: entered.clone(),
        release: release.clone(),
    });

    let controller = Arc::new(h.controller);
    let in_flight = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send_message("first").await })
    };

    entered.notified().await;
    let outcome = controller.send_message("second").await.expect("send");
    assert_eq!(outcome, SendOutcome::Busy);

    release.notify_one();
    let first = in_flight.await.expect("join").expect("first send");
    assert_eq!(first, SendOutcome::Sent);

    // The guard clears once the turn settles.
    let outcome = controller.send_message("third").await.expect("send");
    assert_eq!(outcome, SendOutcome::Sent);
}

#[tokio::test]
async fn select_chat_swaps_the_message_feed() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));
    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");
    let owner = h.identity.current().uid;

    let first = h
        .store
        .create_chat("First", ProviderId::ChatGpt, &owner)
        .await
        .expect("create chat");
    let second = h
        .store
        .create_chat("Second", ProviderId::ChatGpt, &owner)
        .await
        .expect("create chat");

    h.controller.select_chat(first.clone()).await.expect("select");
    assert_eq!(h.controller.active_chat().expect("active"), Some(first));

    h.controller.select_chat(second.clone()).await.expect("select");
    assert_eq!(
        h.controller.active_chat().expect("active"),
        Some(second.clone())
    );

    let mut feed = h
        .controller
        .message_feed()
        .expect("feed")
        .expect("subscribed");
    h.store
        .append_message(&second, "ping", Sender::User, ProviderId::ChatGpt, &owner)
        .await
        .expect("append");
    assert!(feed.has_changed().expect("feed alive"));
    assert_eq!(feed.borrow_and_update().len(), 1);
}

#[tokio::test]
async fn deleting_the_active_chat_clears_activation() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));
    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    h.controller.send_message("hello").await.expect("send");
    let active = h
        .controller
        .active_chat()
        .expect("active")
        .expect("chat created");

    h.controller.delete_chat(&active).await.expect("delete");
    assert!(h.controller.active_chat().expect("active").is_none());
    assert!(h.controller.messages().await.expect("messages").is_empty());
    assert!(h.controller.chats().await.expect("chats").is_empty());
}

#[tokio::test]
async fn start_new_chat_leaves_the_old_chat_intact() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));
    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    h.controller.send_message("hello").await.expect("send");
    h.controller.start_new_chat().expect("start new chat");
    assert!(h.controller.active_chat().expect("active").is_none());

    h.controller.send_message("again").await.expect("send");
    let chats = h.controller.chats().await.expect("chats");
    assert_eq!(chats.len(), 2);
}

#[tokio::test]
async fn identity_change_resets_the_session() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));

    h.controller.send_message("anon hello").await.expect("send");
    assert_eq!(h.controller.messages().await.expect("messages").len(), 2);

    h.identity
        .sign_up("ada@example.com", "hunter42")
        .await
        .expect("sign up");

    // The anonymous transcript does not leak into the authenticated session.
    assert!(h.controller.messages().await.expect("messages").is_empty());
    assert!(h.controller.active_chat().expect("active").is_none());
}

#[tokio::test]
async fn switching_provider_resets_the_model_selection() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));

    h.controller.set_model("gpt-4o").expect("set model");
    assert_eq!(
        h.controller.model().expect("model").as_deref(),
        Some("gpt-4o")
    );

    h.controller
        .set_provider(ProviderId::Claude)
        .expect("set provider");
    assert_eq!(h.controller.provider().expect("provider"), ProviderId::Claude);
    assert!(h.controller.model().expect("model").is_none());
}

#[tokio::test]
async fn send_to_an_unregistered_provider_is_a_provider_error() {
    let h = harness(ScriptedAdapter::replying(ProviderId::ChatGpt, "reply"));

    h.controller
        .set_provider(ProviderId::Gemini)
        .expect("set provider");
    let error = h
        .controller
        .send_message("hello")
        .await
        .expect_err("no adapter registered");
    assert_eq!(error.kind, SessionErrorKind::Provider);
    assert!(error.message.contains("gemini"));

    // The guard clears on the failure path too.
    h.controller
        .set_provider(ProviderId::ChatGpt)
        .expect("set provider");
    let outcome = h.controller.send_message("hello").await.expect("send");
    assert_eq!(outcome, SendOutcome::Sent);
}
