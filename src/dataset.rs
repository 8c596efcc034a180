//! Dataset query: discover sessions under a data root and filter them for
//! batch processing.

use std::path::Path;

use crate::error::BpResult;
use crate::session::{Session, discover_session_dirs};

/// Optional filters applied to a discovered dataset. Empty filters match
/// everything.
#[derive(Debug, Default, Clone)]
pub struct DatasetFilter {
    pub robot: Option<String>,
    pub env: Option<String>,
    /// Date prefix: `YYYY`, `YYYY-MM`, or `YYYY-MM-DD`.
    pub date: Option<String>,
    /// Exact session directory name.
    pub name: Option<String>,
}

impl DatasetFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(robot) = &self.robot
            && session.robot() != robot
        {
            return false;
        }
        if let Some(env) = &self.env
            && session.environment() != env
        {
            return false;
        }
        if let Some(date) = &self.date {
            match session.date() {
                Some(session_date) if session_date.starts_with(date.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(name) = &self.name
            && session.name() != *name
        {
            return false;
        }
        true
    }
}

/// An ordered collection of sessions. Iteration order is discovery order
/// (sorted paths), which batch processing preserves.
#[derive(Debug)]
pub struct Dataset {
    sessions: Vec<Session>,
}

impl Dataset {
    /// Scan the `env_robot/session` layout under `root`.
    pub fn discover(root: &Path) -> BpResult<Self> {
        let mut sessions = Vec::new();
        for dir in discover_session_dirs(root)? {
            sessions.push(Session::load(&dir)?);
        }
        Ok(Self { sessions })
    }

    #[must_use]
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        Self { sessions }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Sessions matching the filter, in discovery order.
    #[must_use]
    pub fn filter(&self, filter: &DatasetFilter) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }
}
