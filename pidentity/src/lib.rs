//! Identity resolution for the palaver chat backend.
//!
//! The resolver keeps exactly one active [`Identity`] at all times. A fresh
//! resolver starts anonymous, and signing out re-establishes a new anonymous
//! identity rather than leaving the session ownerless. When an anonymous
//! session becomes an authenticated one, the resolver hands the anonymous
//! chats to the new owner before the sign-in completes; a failed hand-off is
//! reported as a warning on the outcome, never as a sign-in failure.

mod error;

pub use error::{IdentityError, IdentityErrorKind};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use pcommon::UserId;
use pprovider::SecretString;
use pstore::ConversationStore;
use tokio::sync::watch;
use uuid::Uuid;

const MIN_PASSWORD_LENGTH: usize = 6;

/// The resolved owner of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_anonymous: bool,
    pub email_verified: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            uid: UserId::anonymous(),
            email: None,
            display_name: None,
            is_anonymous: true,
            email_verified: false,
        }
    }
}

/// A successful sign-in, plus the non-fatal ownership hand-off warning if the
/// anonymous chats could not be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInOutcome {
    pub identity: Identity,
    pub transfer_warning: Option<String>,
}

struct AccountRecord {
    uid: UserId,
    email: String,
    display_name: Option<String>,
    // Google-provisioned accounts have no password.
    password: Option<SecretString>,
    email_verified: bool,
}

impl AccountRecord {
    fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: Some(self.email.clone()),
            display_name: self.display_name.clone(),
            is_anonymous: false,
            email_verified: self.email_verified,
        }
    }
}

pub struct IdentityResolver {
    store: Arc<dyn ConversationStore>,
    accounts: Mutex<HashMap<String, AccountRecord>>,
    active: watch::Sender<Identity>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        let (active, _) = watch::channel(Identity::anonymous());
        Self {
            store,
            accounts: Mutex::new(HashMap::new()),
            active,
        }
    }

    /// The identity currently owning the session.
    pub fn current(&self) -> Identity {
        self.active.borrow().clone()
    }

    /// Watch the active identity. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Identity> {
        self.active.subscribe()
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignInOutcome, IdentityError> {
        let email = normalize_email(email)?;
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(IdentityError::invalid_input(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let identity = {
            let mut accounts = self.accounts()?;
            if accounts.contains_key(&email) {
                return Err(IdentityError::account_exists(format!(
                    "An account already exists for {email}"
                )));
            }

            let account = AccountRecord {
                uid: UserId::new(Uuid::new_v4().to_string()),
                email: email.clone(),
                display_name: derive_display_name(&email),
                password: Some(SecretString::new(password)),
                email_verified: false,
            };
            let identity = account.identity();
            accounts.insert(email, account);
            identity
        };

        Ok(self.complete_sign_in(identity).await)
    }

    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignInOutcome, IdentityError> {
        let email = normalize_email(email)?;

        let identity = {
            let accounts = self.accounts()?;
            let account = accounts.get(&email).ok_or_else(|| {
                IdentityError::account_missing(format!("No account found for {email}"))
            })?;

            let matches = account
                .password
                .as_ref()
                .is_some_and(|stored| stored.expose() == password);
            if !matches {
                return Err(IdentityError::invalid_credentials(
                    "Incorrect email or password",
                ));
            }
            account.identity()
        };

        Ok(self.complete_sign_in(identity).await)
    }

    /// Sign in with a Google-asserted email, provisioning the account on
    /// first use. Google identities arrive pre-verified.
    pub async fn sign_in_with_google(
        &self,
        email: &str,
        display_name: &str,
    ) -> Result<SignInOutcome, IdentityError> {
        let email = normalize_email(email)?;

        let identity = {
            let mut accounts = self.accounts()?;
            let account = accounts.entry(email.clone()).or_insert_with(|| AccountRecord {
                uid: UserId::new(Uuid::new_v4().to_string()),
                email,
                display_name: None,
                password: None,
                email_verified: true,
            });
            if !display_name.trim().is_empty() {
                account.display_name = Some(display_name.trim().to_string());
            }
            account.email_verified = true;
            account.identity()
        };

        Ok(self.complete_sign_in(identity).await)
    }

    /// Establish a fresh anonymous identity.
    pub fn sign_in_anonymously(&self) -> Identity {
        let identity = Identity::anonymous();
        self.active.send_replace(identity.clone());
        identity
    }

    /// Drop the authenticated identity and return to anonymous.
    pub fn sign_out(&self) -> Identity {
        self.sign_in_anonymously()
    }

    pub fn reset_password(&self, email: &str) -> Result<(), IdentityError> {
        let email = normalize_email(email)?;
        let accounts = self.accounts()?;
        if !accounts.contains_key(&email) {
            return Err(IdentityError::account_missing(format!(
                "No account found for {email}"
            )));
        }
        tracing::info!(email = %email, "password reset requested");
        Ok(())
    }

    /// Transfer anonymous chats to the new owner, then activate the identity.
    async fn complete_sign_in(&self, identity: Identity) -> SignInOutcome {
        let previous = self.current();
        let mut transfer_warning = None;

        if previous.is_anonymous && !identity.is_anonymous {
            match self
                .store
                .transfer_ownership(&previous.uid, &identity.uid)
                .await
            {
                Ok(moved) if moved > 0 => {
                    tracing::info!(
                        owner = %identity.uid,
                        chats = moved,
                        "transferred anonymous chats to account"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        owner = %identity.uid,
                        error = %error,
                        "anonymous chat transfer failed"
                    );
                    transfer_warning =
                        Some(format!("Could not migrate anonymous chats: {}", error.message));
                }
            }
        }

        self.active.send_replace(identity.clone());
        SignInOutcome {
            identity,
            transfer_warning,
        }
    }

    fn accounts(&self) -> Result<MutexGuard<'_, HashMap<String, AccountRecord>>, IdentityError> {
        self.accounts
            .lock()
            .map_err(|_| IdentityError::internal("account directory lock poisoned"))
    }
}

fn normalize_email(email: &str) -> Result<String, IdentityError> {
    let email = email.trim().to_ascii_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(IdentityError::invalid_input(
            "A valid email address is required",
        ));
    }
    Ok(email)
}

fn derive_display_name(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(local, _)| local.to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pprovider::ProviderId;
    use pstore::{InMemoryConversationStore, Sender};

    fn resolver() -> (Arc<InMemoryConversationStore>, IdentityResolver) {
        let store = Arc::new(InMemoryConversationStore::new());
        let resolver = IdentityResolver::new(store.clone());
        (store, resolver)
    }

    #[tokio::test]
    async fn fresh_resolver_is_anonymous() {
        let (_, resolver) = resolver();
        let identity = resolver.current();
        assert!(identity.is_anonymous);
        assert!(identity.uid.is_anonymous());
    }

    #[tokio::test]
    async fn sign_up_derives_display_name_from_email() {
        let (_, resolver) = resolver();
        let outcome = resolver
            .sign_up("Ada.Lovelace@example.com", "hunter42")
            .await
            .expect("sign up");

        assert_eq!(outcome.identity.email.as_deref(), Some("ada.lovelace@example.com"));
        assert_eq!(outcome.identity.display_name.as_deref(), Some("ada.lovelace"));
        assert!(!outcome.identity.is_anonymous);
        assert!(outcome.transfer_warning.is_none());
        assert_eq!(resolver.current(), outcome.identity);
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let (_, resolver) = resolver();
        resolver
            .sign_up("ada@example.com", "hunter42")
            .await
            .expect("first sign up");
        let error = resolver
            .sign_up("ada@example.com", "other-password")
            .await
            .expect_err("second sign up");
        assert_eq!(error.kind, IdentityErrorKind::AccountExists);
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let (_, resolver) = resolver();
        let error = resolver
            .sign_up("ada@example.com", "short")
            .await
            .expect_err("short password");
        assert_eq!(error.kind, IdentityErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn sign_in_checks_the_password() {
        let (_, resolver) = resolver();
        resolver
            .sign_up("ada@example.com", "hunter42")
            .await
            .expect("sign up");
        resolver.sign_out();

        let error = resolver
            .sign_in("ada@example.com", "wrong")
            .await
            .expect_err("wrong password");
        assert_eq!(error.kind, IdentityErrorKind::InvalidCredentials);
        assert!(resolver.current().is_anonymous);

        let outcome = resolver
            .sign_in("ada@example.com", "hunter42")
            .await
            .expect("sign in");
        assert_eq!(outcome.identity.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn sign_in_transfers_anonymous_chats_first() {
        let (store, resolver) = resolver();
        let anonymous = resolver.current().uid;
        let chat = store
            .create_chat("Scratch", ProviderId::Claude, &anonymous)
            .await
            .expect("create chat");
        store
            .append_message(&chat, "hello", Sender::User, ProviderId::Claude, &anonymous)
            .await
            .expect("append message");

        let outcome = resolver
            .sign_up("ada@example.com", "hunter42")
            .await
            .expect("sign up");
        assert!(outcome.transfer_warning.is_none());

        let chats = store
            .load_chats(&outcome.identity.uid)
            .await
            .expect("load chats");
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title, "Scratch");
        assert!(!chats[0].is_anonymous);
    }

    #[tokio::test]
    async fn google_sign_in_provisions_a_verified_account() {
        let (_, resolver) = resolver();
        let outcome = resolver
            .sign_in_with_google("ada@example.com", "Ada Lovelace")
            .await
            .expect("google sign in");
        assert!(outcome.identity.email_verified);
        assert_eq!(outcome.identity.display_name.as_deref(), Some("Ada Lovelace"));

        // A second Google sign-in reuses the same account.
        resolver.sign_out();
        let again = resolver
            .sign_in_with_google("ada@example.com", "Ada Lovelace")
            .await
            .expect("google sign in again");
        assert_eq!(again.identity.uid, outcome.identity.uid);
    }

    #[tokio::test]
    async fn sign_out_restores_a_fresh_anonymous_identity() {
        let (_, resolver) = resolver();
        resolver
            .sign_up("ada@example.com", "hunter42")
            .await
            .expect("sign up");

        let mut watcher = resolver.subscribe();
        watcher.borrow_and_update();

        let identity = resolver.sign_out();
        assert!(identity.is_anonymous);
        assert!(watcher.has_changed().expect("watch alive"));
        assert!(watcher.borrow_and_update().is_anonymous);
    }

    #[tokio::test]
    async fn reset_password_requires_a_known_account() {
        let (_, resolver) = resolver();
        let error = resolver
            .reset_password("ghost@example.com")
            .expect_err("unknown account");
        assert_eq!(error.kind, IdentityErrorKind::AccountMissing);

        resolver
            .sign_up("ada@example.com", "hunter42")
            .await
            .expect("sign up");
        resolver
            .reset_password("ada@example.com")
            .expect("reset password");
    }

    #[test]
    fn invalid_emails_are_rejected() {
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("user@localhost").is_err());
        assert_eq!(
            normalize_email("  Ada@Example.COM ").expect("valid email"),
            "ada@example.com"
        );
    }
}
