//! Presence ledger: the set of students confirmed present in a session.

use crate::types::{AttendanceTally, PresenceRecord, RosterEntry, StudentId};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Append-only, idempotent set of confirmed students.
///
/// Records keep confirmation order. Nothing is ever removed except by
/// [`reset`](Self::reset), which the session calls when a new run starts.
#[derive(Debug, Default, Clone)]
pub struct PresenceLedger {
    records: Vec<PresenceRecord>,
    members: HashSet<StudentId>,
}

impl PresenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a student if absent. Returns `true` only when the student was newly added.
    pub fn confirm(&mut self, student_id: StudentId, display_name: &str, at: DateTime<Utc>) -> bool {
        if !self.members.insert(student_id) {
            return false;
        }
        self.records.push(PresenceRecord {
            student_id,
            display_name: display_name.to_string(),
            confirmed_at: at,
        });
        true
    }

    pub fn contains(&self, student_id: StudentId) -> bool {
        self.members.contains(&student_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.members.clear();
    }

    /// Confirmed students in confirmation order.
    pub fn snapshot(&self) -> &[PresenceRecord] {
        &self.records
    }

    /// Present/absent counts against a roster.
    ///
    /// `present` is the ledger size; `absent` counts roster entries not in the
    /// ledger, so students confirmed but missing from the roster never drive
    /// it below zero.
    pub fn tally(&self, roster: &[RosterEntry]) -> AttendanceTally {
        let absent_students: Vec<RosterEntry> = roster
            .iter()
            .filter(|entry| !self.contains(entry.student_id))
            .cloned()
            .collect();

        AttendanceTally {
            roster_size: roster.len(),
            present: self.len(),
            absent: absent_students.len(),
            absent_students,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, name: &str) -> RosterEntry {
        RosterEntry {
            student_id: StudentId(id),
            display_name: name.into(),
            last_known_photo_ref: None,
        }
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let mut ledger = PresenceLedger::new();
        let now = Utc::now();
        assert!(ledger.confirm(StudentId(1), "Ada", now));
        assert!(!ledger.confirm(StudentId(1), "Ada", now));
        assert!(!ledger.confirm(StudentId(1), "Someone Else", now));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.snapshot()[0].display_name, "Ada");
    }

    #[test]
    fn test_snapshot_keeps_confirmation_order() {
        let mut ledger = PresenceLedger::new();
        let now = Utc::now();
        ledger.confirm(StudentId(9), "Grace", now);
        ledger.confirm(StudentId(2), "Alan", now);
        let ids: Vec<_> = ledger.snapshot().iter().map(|r| r.student_id).collect();
        assert_eq!(ids, vec![StudentId(9), StudentId(2)]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = PresenceLedger::new();
        ledger.confirm(StudentId(1), "Ada", Utc::now());
        ledger.reset();
        assert!(ledger.is_empty());
        assert!(!ledger.contains(StudentId(1)));
        assert!(ledger.confirm(StudentId(1), "Ada", Utc::now()));
    }

    #[test]
    fn test_tally() {
        let roster = vec![entry(1, "Ada"), entry(2, "Alan"), entry(3, "Grace")];
        let mut ledger = PresenceLedger::new();
        ledger.confirm(StudentId(2), "Alan", Utc::now());

        let tally = ledger.tally(&roster);
        assert_eq!(tally.roster_size, 3);
        assert_eq!(tally.present, 1);
        assert_eq!(tally.absent, 2);
        let absent: Vec<_> = tally.absent_students.iter().map(|e| e.student_id.0).collect();
        assert_eq!(absent, vec![1, 3]);
    }

    #[test]
    fn test_tally_ignores_students_off_roster() {
        let roster = vec![entry(1, "Ada")];
        let mut ledger = PresenceLedger::new();
        ledger.confirm(StudentId(1), "Ada", Utc::now());
        ledger.confirm(StudentId(77), "Visitor", Utc::now());

        let tally = ledger.tally(&roster);
        assert_eq!(tally.present, 2);
        assert_eq!(tally.absent, 0);
    }
}
