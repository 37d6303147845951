//! Session credential and the gate that publishes it.
//!
//! The [`CredentialGate`] is the single owner of the current session token.
//! Login sets it, logout (or an authentication failure anywhere in the engine)
//! clears it. Consumers observe changes through a `watch` receiver, so the
//! connection runtime learns about a cleared credential without polling.

use std::{fmt, sync::Arc};

use tokio::sync::watch;

use crate::error::CredentialError;

/// Opaque bearer token for the current session.
///
/// Never empty. `Debug` output is redacted so tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Validate and wrap a token. Surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// - `CredentialError::Empty` if nothing is left after trimming
    /// - `CredentialError::InvalidCharacter` for control characters
    pub fn new(token: &str) -> Result<Self, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }
        if let Some(c) = token.chars().find(|c| c.is_control()) {
            return Err(CredentialError::InvalidCharacter(c));
        }
        Ok(Self(Arc::from(token)))
    }

    /// Raw token, for the transport and REST layers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Publishes the current session credential.
///
/// Cheap to clone; all clones share one slot.
#[derive(Clone)]
pub struct CredentialGate {
    tx: Arc<watch::Sender<Option<Credential>>>,
}

impl CredentialGate {
    /// Gate with no credential (logged out).
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Gate that starts logged in.
    ///
    /// # Errors
    ///
    /// - See [`Credential::new`]
    pub fn with_token(token: &str) -> Result<Self, CredentialError> {
        let gate = Self::new();
        gate.set(Credential::new(token)?);
        Ok(gate)
    }

    /// Install a credential (login). Replaces any previous one.
    pub fn set(&self, credential: Credential) {
        self.tx.send_replace(Some(credential));
        tracing::info!("credential set");
    }

    /// Drop the credential (logout). Returns `true` if one was present.
    ///
    /// Observers are only notified when the gate actually changes.
    pub fn clear(&self) -> bool {
        let cleared = self.tx.send_if_modified(|slot| slot.take().is_some());
        if cleared {
            tracing::info!("credential cleared");
        }
        cleared
    }

    /// Current credential, if logged in.
    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    /// Whether a credential is present.
    pub fn is_present(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Observe credential changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}

impl Default for CredentialGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialGate").field("present", &self.is_present()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_are_rejected() {
        assert_eq!(Credential::new("   "), Err(CredentialError::Empty));
        assert_eq!(Credential::new(""), Err(CredentialError::Empty));
        assert_eq!(Credential::new("a\nb"), Err(CredentialError::InvalidCharacter('\n')));
    }

    #[test]
    fn debug_is_redacted() {
        let credential = Credential::new("secret-token").unwrap();
        assert!(!format!("{credential:?}").contains("secret"));
        assert_eq!(credential.bearer(), "Bearer secret-token");
    }

    #[test]
    fn clear_notifies_only_on_change() {
        let gate = CredentialGate::with_token("t").unwrap();
        let mut rx = gate.subscribe();
        rx.mark_unchanged();

        assert!(gate.clear());
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        assert!(!gate.clear());
        assert!(!rx.has_changed().unwrap());
        assert!(gate.current().is_none());
    }

    #[test]
    fn clones_share_state() {
        let gate = CredentialGate::new();
        let other = gate.clone();
        other.set(Credential::new("t").unwrap());
        assert_eq!(gate.current().map(|c| c.expose().to_owned()), Some("t".to_owned()));
    }
}
