//! Classification of peer-reported error codes
//!
//! The peer reports failures as `{"event":"error","code":...,"msg":...}`.
//! Only a few codes change client behaviour: rate limiting and transient
//! blocking put the session into a send cooldown, and "already subscribed"
//! replies are tolerated during subscription replay. Everything else is
//! surfaced to the error hook and otherwise ignored.

/// Codes the server uses when a client sends too fast
pub const RATE_LIMIT_CODES: &[&str] = &["429", "50011", "60014"];

/// Codes the server uses when it temporarily refuses requests
pub const BLOCKED_CODES: &[&str] = &["403", "50013"];

/// Codes the server uses for a duplicate subscription
pub const ALREADY_SUBSCRIBED_CODES: &[&str] = &["60018"];

/// How the client should react to a peer error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCodeKind {
    /// Too many requests; cool down before sending again
    RateLimited,
    /// Temporarily refused; cool down before sending again
    Blocked,
    /// Subscription already exists on the peer side
    AlreadySubscribed,
    /// Anything else; report and continue
    Other,
}

impl ErrorCodeKind {
    /// Classify with the built-in code table
    pub fn classify(code: &str, msg: &str) -> Self {
        CodeTable::default().classify(code, msg)
    }

    /// Whether the client should pause sending
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Blocked)
    }
}

/// Code lists used for classification
///
/// Exchanges occasionally renumber their error codes, so the lists are
/// data rather than match arms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    /// Rate limit codes
    pub rate_limited: Vec<String>,
    /// Transient block codes
    pub blocked: Vec<String>,
    /// Duplicate subscription codes
    pub already_subscribed: Vec<String>,
}

impl Default for CodeTable {
    fn default() -> Self {
        Self {
            rate_limited: RATE_LIMIT_CODES.iter().map(|c| c.to_string()).collect(),
            blocked: BLOCKED_CODES.iter().map(|c| c.to_string()).collect(),
            already_subscribed: ALREADY_SUBSCRIBED_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl CodeTable {
    /// Classify a code, falling back to the message text for duplicate
    /// subscriptions since not every server assigns them a code
    pub fn classify(&self, code: &str, msg: &str) -> ErrorCodeKind {
        let has = |list: &[String]| list.iter().any(|c| c == code);

        if has(&self.rate_limited) {
            ErrorCodeKind::RateLimited
        } else if has(&self.blocked) {
            ErrorCodeKind::Blocked
        } else if has(&self.already_subscribed)
            || msg.to_ascii_lowercase().contains("already subscribed")
        {
            ErrorCodeKind::AlreadySubscribed
        } else {
            ErrorCodeKind::Other
        }
    }

    /// Add a rate limit code
    pub fn with_rate_limit_code(mut self, code: impl Into<String>) -> Self {
        self.rate_limited.push(code.into());
        self
    }

    /// Add a transient block code
    pub fn with_blocked_code(mut self, code: impl Into<String>) -> Self {
        self.blocked.push(code.into());
        self
    }
}
