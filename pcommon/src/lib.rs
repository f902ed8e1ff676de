//! Shared identifier newtypes and async primitives for the palaver workspace.
//!
//! ```rust
//! use pcommon::{ChatId, UserId};
//!
//! let owner = UserId::anonymous();
//! assert!(owner.is_anonymous());
//!
//! let chat = ChatId::new("chat-1");
//! assert_eq!(chat.as_str(), "chat-1");
//! ```

pub mod future {
    //! Shared async future aliases.
    //!
    //! ```rust
    //! use pcommon::BoxFuture;
    //!
    //! fn str_len<'a>(value: &'a str) -> BoxFuture<'a, usize> {
    //!     Box::pin(async move { value.len() })
    //! }
    //!
    //! let _future = str_len("hello");
    //! ```

    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

pub mod ids {
    //! Owner, chat, and message identifier newtypes.
    //!
    //! Identifiers are opaque strings assigned by the store (chats, messages)
    //! or the identity resolver (users). The anonymous owner is a fixed
    //! sentinel so that anonymous sessions never collide with real accounts.

    use std::fmt::{Display, Formatter};

    use serde::{Deserialize, Serialize};

    pub const ANONYMOUS_USER_ID: &str = "anonymous";

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UserId(String);

    impl UserId {
        pub fn new(value: impl Into<String>) -> Self {
            Self(value.into())
        }

        pub fn anonymous() -> Self {
            Self(ANONYMOUS_USER_ID.to_string())
        }

        pub fn is_anonymous(&self) -> bool {
            self.0.is_empty() || self.0 == ANONYMOUS_USER_ID
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl Display for UserId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<String> for UserId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    impl From<&str> for UserId {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChatId(String);

    impl ChatId {
        pub fn new(value: impl Into<String>) -> Self {
            Self(value.into())
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl Display for ChatId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<String> for ChatId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    impl From<&str> for ChatId {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MessageId(String);

    impl MessageId {
        pub fn new(value: impl Into<String>) -> Self {
            Self(value.into())
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl Display for MessageId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<String> for MessageId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    impl From<&str> for MessageId {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }
}

pub use future::BoxFuture;
pub use ids::{ANONYMOUS_USER_ID, ChatId, MessageId, UserId};
