//! Resumable session bookkeeping.

/// Snapshot of the gateway session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id from READY.
    pub session_id: Option<String>,
    /// Highest dispatch sequence number seen.
    pub seq: Option<u64>,
    /// Gateway URL to resume against.
    pub resume_url: Option<String>,
}

impl SessionInfo {
    /// Record a dispatch sequence number. Sequence numbers never move backwards.
    pub fn observe_seq(&mut self, seq: u64) {
        self.seq = Some(self.seq.map_or(seq, |current| current.max(seq)));
    }

    /// Record a new session from READY.
    pub fn start(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
    }

    /// Whether there is a session to resume.
    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// Forget the session.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
