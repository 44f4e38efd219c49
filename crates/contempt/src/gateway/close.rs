//! Close code classification.

/// Close code sent by the client on a clean, user-requested disconnect.
pub const CLIENT_CLOSE_CODE: u16 = 1000;

/// Close code used when abandoning a socket that stopped acknowledging
/// heartbeats. Anything outside 1000/1001 keeps the session resumable.
pub const ZOMBIE_CLOSE_CODE: u16 = 4000;

/// What to do after the socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the session.
    Resume,
    /// Reconnect with a fresh identify.
    Reidentify,
    /// Stop; the token was rejected.
    FailAuthentication,
    /// Stop; reconnecting cannot help.
    Fail,
}

/// Which close codes end the session or the connection.
///
/// Codes in none of the lists, and closes without a code, are resumable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCodePolicy {
    /// The token was rejected.
    pub authentication: Vec<u16>,
    /// Reconnecting cannot help: bad shard, bad API version, bad intents.
    pub fatal: Vec<u16>,
    /// The session is gone: bad sequence or session timeout.
    pub session_invalidating: Vec<u16>,
}

impl Default for CloseCodePolicy {
    fn default() -> Self {
        Self {
            authentication: vec![4004],
            fatal: vec![4010, 4011, 4012, 4013, 4014],
            session_invalidating: vec![4007, 4009],
        }
    }
}

impl CloseCodePolicy {
    /// Classify a close.
    #[must_use]
    pub fn classify(&self, code: Option<u16>) -> CloseAction {
        let Some(code) = code else {
            return CloseAction::Resume;
        };
        if self.authentication.contains(&code) {
            CloseAction::FailAuthentication
        } else if self.fatal.contains(&code) {
            CloseAction::Fail
        } else if self.session_invalidating.contains(&code) {
            CloseAction::Reidentify
        } else {
            CloseAction::Resume
        }
    }

    /// Whether `code` signals a rejected token.
    #[must_use]
    pub fn is_authentication_failure(&self, code: u16) -> bool {
        self.authentication.contains(&code)
    }
}
