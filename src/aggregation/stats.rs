//! Dashboard counters and partial updates.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Names of the derived dashboard counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Counter {
    PendingUsers,
    ApprovedUsers,
    RejectedUsers,
    TotalProfiles,
    TotalFlags,
    TotalComments,
}

impl Counter {
    pub const ALL: [Counter; 6] = [
        Counter::PendingUsers,
        Counter::ApprovedUsers,
        Counter::RejectedUsers,
        Counter::TotalProfiles,
        Counter::TotalFlags,
        Counter::TotalComments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingUsers => "pendingUsers",
            Self::ApprovedUsers => "approvedUsers",
            Self::RejectedUsers => "rejectedUsers",
            Self::TotalProfiles => "totalProfiles",
            Self::TotalFlags => "totalFlags",
            Self::TotalComments => "totalComments",
        }
    }
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full set of dashboard counters.
///
/// Every counter starts at 0 and keeps its last value until the feed that
/// owns it delivers again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub pending_users: u64,
    pub approved_users: u64,
    pub rejected_users: u64,
    pub total_profiles: u64,
    pub total_flags: u64,
    pub total_comments: u64,
}

impl Statistics {
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::PendingUsers => self.pending_users,
            Counter::ApprovedUsers => self.approved_users,
            Counter::RejectedUsers => self.rejected_users,
            Counter::TotalProfiles => self.total_profiles,
            Counter::TotalFlags => self.total_flags,
            Counter::TotalComments => self.total_comments,
        }
    }

    pub fn set(&mut self, counter: Counter, value: u64) {
        let slot = match counter {
            Counter::PendingUsers => &mut self.pending_users,
            Counter::ApprovedUsers => &mut self.approved_users,
            Counter::RejectedUsers => &mut self.rejected_users,
            Counter::TotalProfiles => &mut self.total_profiles,
            Counter::TotalFlags => &mut self.total_flags,
            Counter::TotalComments => &mut self.total_comments,
        };
        *slot = value;
    }

    /// Field-wise overwrite; counters absent from `partial` are untouched.
    pub fn apply(&mut self, partial: &PartialStatistics) {
        for (counter, value) in partial.iter() {
            self.set(counter, value);
        }
    }

    /// Approved plus pending users (rejected accounts are not members)
    pub fn total_users(&self) -> u64 {
        self.approved_users + self.pending_users
    }
}

/// Update touching only the counters owned by one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialStatistics {
    updates: SmallVec<[(Counter, u64); 3]>,
}

impl PartialStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`
    pub fn with(mut self, counter: Counter, value: u64) -> Self {
        self.set(counter, value);
        self
    }

    /// Set a counter, replacing an earlier value for the same counter
    pub fn set(&mut self, counter: Counter, value: u64) {
        match self.updates.iter_mut().find(|(c, _)| *c == counter) {
            Some(entry) => entry.1 = value,
            None => self.updates.push((counter, value)),
        }
    }

    pub fn get(&self, counter: Counter) -> Option<u64> {
        self.updates
            .iter()
            .find(|(c, _)| *c == counter)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        self.updates.iter().copied()
    }

    pub fn counters(&self) -> impl Iterator<Item = Counter> + '_ {
        self.updates.iter().map(|(c, _)| *c)
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}
