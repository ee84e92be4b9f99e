//! Operator include/exclude rules over a candidate session set
//!
//! Raw addresses are only ever compared with stored raw addresses, and hashes
//! with stored hashes. The include rule runs first and the exclude rule second,
//! so an excluded visitor can never be brought back by an include entry.

use std::collections::HashSet;

use serde::Serialize;

use crate::identity::IdentityHasher;
use crate::types::{IpFilter, Session};

/// Filter rules with operator addresses already hashed
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    include_addresses: HashSet<String>,
    include_hashes: HashSet<String>,
    exclude_addresses: HashSet<String>,
    exclude_hashes: HashSet<String>,
}

impl CompiledFilter {
    pub fn compile(filter: &IpFilter, hasher: &IdentityHasher) -> Self {
        let mut exclude_hashes: HashSet<String> =
            hasher.hash_all(&filter.exclude).into_iter().collect();
        exclude_hashes.extend(filter.exclude_hashes.iter().map(|h| h.trim().to_string()));

        Self {
            include_addresses: filter.include.iter().map(|a| a.trim().to_string()).collect(),
            include_hashes: hasher.hash_all(&filter.include).into_iter().collect(),
            exclude_addresses: filter.exclude.iter().map(|a| a.trim().to_string()).collect(),
            exclude_hashes,
        }
    }

    fn has_include_rule(&self) -> bool {
        !self.include_addresses.is_empty()
    }

    fn is_included(&self, session: &Session) -> bool {
        if !self.has_include_rule() {
            return true;
        }
        let by_hash = session
            .identity_hash
            .as_ref()
            .is_some_and(|h| self.include_hashes.contains(h));
        let by_address = session
            .raw_address
            .as_ref()
            .is_some_and(|a| self.include_addresses.contains(a.trim()));
        by_hash || by_address
    }

    fn is_excluded(&self, session: &Session) -> bool {
        let by_hash = session
            .identity_hash
            .as_ref()
            .is_some_and(|h| self.exclude_hashes.contains(h));
        let by_address = session
            .raw_address
            .as_ref()
            .is_some_and(|a| self.exclude_addresses.contains(a.trim()));
        by_hash || by_address
    }
}

/// What the filter did to a candidate set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub candidates: usize,
    pub dropped_by_include: usize,
    pub dropped_by_exclude: usize,
    pub kept: usize,
}

/// Apply the operator filter to window-scoped sessions
pub fn apply(
    sessions: Vec<Session>,
    filter: &IpFilter,
    hasher: &IdentityHasher,
) -> (Vec<Session>, FilterStats) {
    let compiled = CompiledFilter::compile(filter, hasher);
    let mut stats = FilterStats {
        candidates: sessions.len(),
        ..Default::default()
    };

    let mut kept = Vec::with_capacity(sessions.len());
    for session in sessions {
        if !compiled.is_included(&session) {
            stats.dropped_by_include += 1;
        } else if compiled.is_excluded(&session) {
            stats.dropped_by_exclude += 1;
        } else {
            kept.push(session);
        }
    }
    stats.kept = kept.len();
    (kept, stats)
}
