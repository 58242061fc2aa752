//! Leadership interface consumed by the oracle.
//!
//! Leader election itself is an external collaborator. The oracle consumes
//! two things from it: a best-effort local predicate ([`Leadership::check`])
//! gating the allocation hot path, and the member identity that the durable
//! store compares against the leader key atomically with every save
//! ([`Leadership::member`]). The binding of "writer is still leader" to
//! "write commits" lives in the store precondition, not here; `check` alone
//! is never sufficient to authorize a durable write.

use std::sync::atomic::{AtomicBool, Ordering};

/// Handle to the current leadership term.
pub trait Leadership: Send + Sync {
    /// Best-effort local predicate: is this process still leader?
    fn check(&self) -> bool;

    /// Identity recorded under the leader key while this member leads.
    fn member(&self) -> &str;
}

/// Process-local leadership backed by an atomic flag.
///
/// Used by tests and by single-node deployments where the daemon claims the
/// leader key itself at startup. Multi-node election services provide their
/// own [`Leadership`] implementation.
#[derive(Debug)]
pub struct FlagLeadership {
    member: String,
    leading: AtomicBool,
}

impl FlagLeadership {
    /// Creates a handle for `member`, not yet leading.
    #[must_use]
    pub fn new(member: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            leading: AtomicBool::new(false),
        }
    }

    /// Marks the term as acquired.
    pub fn assume(&self) {
        self.leading.store(true, Ordering::SeqCst);
    }

    /// Marks the term as lost.
    pub fn step_down(&self) {
        self.leading.store(false, Ordering::SeqCst);
    }
}

impl Leadership for FlagLeadership {
    fn check(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    fn member(&self) -> &str {
        &self.member
    }
}
