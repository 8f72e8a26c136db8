//! Ordered status registry with derived entries
//!
//! The registry is the single record of check outcomes for one session.
//! Entries keep their first-insertion order, which is the order checks are
//! reported. Derived entries (e.g. "PSENSE Overall") are recomputed
//! synchronously whenever one of their dependencies changes, and only exist
//! once every dependency exists.

use tracing::info;

use crate::status::CheckStatus;

/// Rule that folds dependency statuses into a derived status
pub type DeriveRule = fn(&[CheckStatus]) -> CheckStatus;

/// PASS iff every dependency is PASS, FAIL otherwise
pub fn all_pass(statuses: &[CheckStatus]) -> CheckStatus {
    CheckStatus::from_pass(statuses.iter().all(|s| s.is_pass()))
}

/// One effective status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub name: String,
    pub previous: Option<CheckStatus>,
    pub status: CheckStatus,
}

#[derive(Debug, Clone)]
struct DerivedEntry {
    name: String,
    dependencies: Vec<String>,
    rule: DeriveRule,
}

/// Ordered mapping of check name to status
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    entries: Vec<(String, CheckStatus)>,
    derived: Vec<DerivedEntry>,
    journal: Vec<StatusUpdate>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of a check, if it has been recorded
    pub fn get(&self, name: &str) -> Option<CheckStatus> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite a status
    ///
    /// Returns `false` without touching derived entries when the value is
    /// unchanged, so repeated observations never produce duplicate
    /// transitions.
    pub fn set(&mut self, name: &str, status: CheckStatus) -> bool {
        if !self.apply(name, status) {
            return false;
        }
        self.recompute_dependents(name);
        true
    }

    /// Register `name` as derived from `dependencies`
    ///
    /// The entry is computed immediately if every dependency is already
    /// present, and again on every later change to any of them.
    pub fn derive(&mut self, name: &str, dependencies: &[&str], rule: DeriveRule) {
        self.derived.retain(|d| d.name != name);
        self.derived.push(DerivedEntry {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            rule,
        });
        self.recompute(name);
    }

    /// Set `status` on every listed check that is absent or still pending
    ///
    /// Returns the names that were filled in.
    pub fn backfill(&mut self, names: &[&str], status: CheckStatus) -> Vec<String> {
        let mut filled = Vec::new();
        for name in names {
            let unresolved = self.get(name).map_or(true, |s| !s.is_resolved());
            if unresolved && self.set(name, status) {
                filled.push(name.to_string());
            }
        }
        filled
    }

    /// Position in the transition journal, for use with [`Self::updates_since`]
    pub fn mark(&self) -> usize {
        self.journal.len()
    }

    /// Transitions applied after `mark`
    pub fn updates_since(&self, mark: usize) -> &[StatusUpdate] {
        self.journal.get(mark..).unwrap_or(&[])
    }

    /// Immutable ordered copy for reporting
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            entries: self.entries.clone(),
        }
    }

    fn apply(&mut self, name: &str, status: CheckStatus) -> bool {
        let previous = match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, current)) if *current == status => return false,
            Some((_, current)) => Some(std::mem::replace(current, status)),
            None => {
                self.entries.push((name.to_string(), status));
                None
            }
        };

        info!(check = %name, %status, previous = ?previous, "Check status changed");
        self.journal.push(StatusUpdate {
            name: name.to_string(),
            previous,
            status,
        });
        true
    }

    fn recompute_dependents(&mut self, changed: &str) {
        let dependents: Vec<String> = self
            .derived
            .iter()
            .filter(|d| d.dependencies.iter().any(|dep| dep == changed))
            .map(|d| d.name.clone())
            .collect();

        for name in dependents {
            self.recompute(&name);
        }
    }

    fn recompute(&mut self, name: &str) {
        let Some(entry) = self.derived.iter().find(|d| d.name == name) else {
            return;
        };

        let statuses: Option<Vec<CheckStatus>> =
            entry.dependencies.iter().map(|dep| self.get(dep)).collect();
        let Some(statuses) = statuses else {
            return;
        };

        let derived = (entry.rule)(&statuses);
        // Goes through `set` so derived-of-derived entries follow along.
        self.set(name, derived);
    }
}

/// Frozen, ordered view of the registry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    entries: Vec<(String, CheckStatus)>,
}

impl StatusSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&str, CheckStatus)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), *s))
    }

    pub fn get(&self, name: &str) -> Option<CheckStatus> {
        self.iter().find(|(n, _)| *n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|(n, _)| n).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when there is at least one entry and every entry is PASS
    pub fn all_pass(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|(_, s)| s.is_pass())
    }

    /// Checks that did not pass
    pub fn failures(&self) -> Vec<(&str, CheckStatus)> {
        self.iter().filter(|(_, s)| !s.is_pass()).collect()
    }
}
