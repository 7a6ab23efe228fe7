//! Administrator membership.
//!
//! Administrators are identified by canonical email. An empty registry is a
//! sentinel: every authenticated identity counts as an administrator. This
//! keeps a fresh deployment usable, but it also means that forgetting to
//! configure admins grants admin pages to everyone who can log in.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::identity::normalize_email;

/// Thread-safe set of administrator emails.
#[derive(Debug, Default)]
pub struct AdminRegistry {
    admins: Mutex<BTreeSet<String>>,
}

impl AdminRegistry {
    /// Creates an empty registry (everyone is an administrator).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.admins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the administrator set.
    ///
    /// Each entry may carry a display name; entries that are empty after
    /// normalization are dropped, duplicates collapse.
    pub fn set_admins<I, S>(&self, emails: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: BTreeSet<String> = emails
            .into_iter()
            .map(|email| normalize_email(email.as_ref()))
            .filter(|email| !email.is_empty())
            .collect();

        let count = normalized.len();
        *self.lock() = normalized;
        tracing::info!(admins = count, "administrator list replaced");
    }

    /// Returns true if `email` is an administrator or the set is empty.
    #[must_use]
    pub fn is_admin(&self, email: &str) -> bool {
        let admins = self.lock();
        admins.is_empty() || admins.contains(email)
    }

    /// Returns the administrator emails in sorted order.
    #[must_use]
    pub fn admins(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }
}
