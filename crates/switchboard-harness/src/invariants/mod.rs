//! Store invariants.
//!
//! Invariants are properties of the inbox that must hold after every
//! operation, whatever the interleaving of REST responses and push events.
//! They check WHAT must be true, not specific scenarios, and run against a
//! consistent [`Inbox`] snapshot taken from the store.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&store.snapshot(), "after reconnect");
//! ```

mod checks;

pub use checks::{PreviewNotStale, SelectedIsListed, SelectedIsRead, UniqueMessageIds};
use switchboard_app::Inbox;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of the inbox that must always hold.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against `inbox`.
    fn check(&self, inbox: &Inbox) -> InvariantResult;
}

/// Registry of invariants to check together.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every store invariant.
    ///
    /// Includes:
    /// - [`SelectedIsListed`]: the selection names a listed conversation
    /// - [`SelectedIsRead`]: the selected conversation has no unread messages
    /// - [`UniqueMessageIds`]: no thread holds a message id twice
    /// - [`PreviewNotStale`]: no listed preview is older than its thread
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SelectedIsListed);
        registry.add(SelectedIsRead);
        registry.add(UniqueMessageIds);
        registry.add(PreviewNotStale);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, inbox: &Inbox) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(inbox).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, inbox: &Inbox, context: &str) {
        if let Err(violations) = self.check_all(inbox) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
