//! Rolling log of finished sync sessions.

use crate::sync::models::SyncSession;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct SyncHistory {
    sessions: VecDeque<SyncSession>,
    limit: usize,
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl SyncHistory {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            sessions: VecDeque::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// Append a session, evicting the oldest past the limit
    pub fn record(&mut self, session: SyncSession) {
        if self.sessions.len() == self.limit {
            self.sessions.pop_front();
        }
        self.sessions.push_back(session);
    }

    /// Newest first
    pub fn recent(&self) -> Vec<SyncSession> {
        self.sessions.iter().rev().cloned().collect()
    }

    pub fn last(&self) -> Option<&SyncSession> {
        self.sessions.back()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_newest_first() {
        let mut history = SyncHistory::with_limit(3);
        assert!(history.is_empty());

        let sessions: Vec<SyncSession> = (0..5).map(|_| SyncSession::start()).collect();
        for session in &sessions {
            history.record(session.clone());
        }

        assert_eq!(history.len(), 3);
        let recent = history.recent();
        assert_eq!(recent[0].id, sessions[4].id);
        assert_eq!(recent[2].id, sessions[2].id);
        assert_eq!(history.last().map(|s| s.id), Some(sessions[4].id));
    }

    #[test]
    fn default_limit() {
        let mut history = SyncHistory::default();
        for _ in 0..30 {
            history.record(SyncSession::start());
        }
        assert_eq!(history.len(), DEFAULT_HISTORY_LIMIT);
    }
}
