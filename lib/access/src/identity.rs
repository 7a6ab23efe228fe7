//! Canonical email identities.
//!
//! The email address is the identity key for admin checks. Providers report
//! it under different field names and sometimes with a display name
//! attached, so both the userinfo document and the admin list go through
//! [`normalize_email`].

use std::fmt;
use std::sync::Arc;
use turnstile_core::Document;

/// Userinfo fields that may carry the email address, in priority order.
pub const EMAIL_FIELDS: [&str; 2] = ["email", "mail"];

/// Extracts the bare address from `Display Name <addr>` or `addr`.
///
/// Parenthesized comments before or after the mailbox, as in
/// `a@b.com (Work)`, are ignored. Quoted local parts, comments inside the
/// address and group syntax are not supported. Returns `None` if the input is
/// not a plausible mailbox.
#[must_use]
pub fn parse_mailbox(input: &str) -> Option<&str> {
    let trimmed = strip_comments(input.trim())?;
    let addr = match trimmed.strip_suffix('>') {
        Some(head) => {
            let (_display, addr) = head.rsplit_once('<')?;
            addr.trim()
        }
        None => trimmed,
    };
    is_addr_spec(addr).then_some(addr)
}

/// Removes leading and trailing `(comment)` groups.
fn strip_comments(mut text: &str) -> Option<&str> {
    while let Some(head) = text.strip_suffix(')') {
        let open = head.rfind('(')?;
        text = head[..open].trim_end();
    }
    while let Some(tail) = text.strip_prefix('(') {
        let close = tail.find(')')?;
        text = tail[close + 1..].trim_start();
    }
    Some(text)
}

fn is_addr_spec(addr: &str) -> bool {
    let Some((local, domain)) = addr.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ',' | ';'))
}

/// Produces the canonical form of an email: display name stripped,
/// trimmed and case-folded.
///
/// Input that does not parse as a mailbox is trimmed and case-folded as-is.
/// Normalizing an already-normalized value returns it unchanged.
#[must_use]
pub fn normalize_email(input: &str) -> String {
    parse_mailbox(input)
        .unwrap_or(input)
        .trim()
        .to_lowercase()
}

/// Callback invoked when a userinfo document carries no usable email.
pub type MissingEmailHook = Arc<dyn Fn(&Document) + Send + Sync>;

/// Derives the canonical email identity from a userinfo document.
#[derive(Clone)]
pub struct IdentityExtractor {
    on_missing: MissingEmailHook,
}

impl IdentityExtractor {
    /// Creates an extractor that logs a warning when no email is found.
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_missing: Arc::new(|userinfo: &Document| {
                tracing::warn!(userinfo = %userinfo, "no email found in userinfo");
            }),
        }
    }

    /// Replaces the diagnostic emitted when no email is found.
    #[must_use]
    pub fn with_missing_hook(mut self, hook: MissingEmailHook) -> Self {
        self.on_missing = hook;
        self
    }

    /// Returns the canonical email from the first usable candidate field.
    ///
    /// A field counts when it holds a string that is non-empty after
    /// normalization. When none does, the diagnostic hook receives the whole
    /// document and `None` is returned; this is not a login failure.
    #[must_use]
    pub fn extract(&self, userinfo: &Document) -> Option<String> {
        let email = EMAIL_FIELDS
            .iter()
            .filter_map(|field| userinfo.get_str(field))
            .map(normalize_email)
            .find(|email| !email.is_empty());

        if email.is_none() {
            (self.on_missing)(userinfo);
        }
        email
    }
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityExtractor").finish_non_exhaustive()
    }
}
