//! Observation tracker: turns per-frame recognition reports into presence.
//!
//! Each candidate identity moves `Unknown → Sighted → Confirmed`. An identity
//! is confirmed once it has been named in `confirmation_threshold` consecutive
//! responses; a response that does not name it resets its streak. Confirmation
//! goes through the [`PresenceLedger`], so each student is reported at most
//! once per session no matter how often the server repeats them.

use crate::ledger::PresenceLedger;
use crate::protocol::{FaceData, FaceReport};
use crate::types::{
    FaceBox, FaceObservation, ObservationStatus, PresenceRecord, RosterEntry, StudentId,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

const UNKNOWN_LABEL: &str = "Unknown";

/// Tuning for the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Consecutive responses naming a student before they are confirmed.
    pub confirmation_threshold: u32,
    /// Reported confidence below this leaves a face `Unknown`.
    pub min_candidate_confidence: f32,
    /// IoU at which two faces with different identities are treated as the same region.
    pub overlap_iou: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 2,
            min_candidate_confidence: 0.0,
            overlap_iou: 0.5,
        }
    }
}

/// Per-session observation state.
#[derive(Debug, Clone)]
pub struct ObservationTracker {
    config: TrackerConfig,
    /// Consecutive-response count per identity named in the latest response.
    streaks: HashMap<StudentId, u32>,
    /// Normalized display name → student, from the roster and from the server.
    directory: HashMap<String, StudentId>,
    display_names: HashMap<StudentId, String>,
    observations: Vec<FaceObservation>,
}

impl ObservationTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            streaks: HashMap::new(),
            directory: HashMap::new(),
            display_names: HashMap::new(),
            observations: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Make roster names resolvable to student ids.
    pub fn seed_roster(&mut self, roster: &[RosterEntry]) {
        for entry in roster {
            self.learn(entry.student_id, &entry.display_name);
        }
    }

    fn learn(&mut self, student_id: StudentId, name: &str) {
        let key = normalize(name);
        if key.is_empty() {
            return;
        }
        self.directory.insert(key, student_id);
        self.display_names.insert(student_id, name.trim().to_string());
    }

    /// Faces from the latest response, for redraw.
    pub fn observations(&self) -> &[FaceObservation] {
        &self.observations
    }

    /// Current consecutive-response count for a student.
    pub fn streak(&self, student_id: StudentId) -> u32 {
        self.streaks.get(&student_id).copied().unwrap_or(0)
    }

    /// Drop streaks and observations. The name directory survives.
    pub fn clear(&mut self) {
        self.streaks.clear();
        self.observations.clear();
    }

    /// Apply one `face_data` response.
    ///
    /// Returns the students this response newly confirmed, in face order.
    pub fn apply(
        &mut self,
        data: &FaceData,
        ledger: &mut PresenceLedger,
        now: DateTime<Utc>,
    ) -> Vec<PresenceRecord> {
        for student in &data.newly_recognized {
            self.learn(student.id, &student.name);
        }

        let mut candidates: Vec<Option<StudentId>> =
            data.faces.iter().map(|face| self.resolve(face, data)).collect();
        self.break_overlap_ties(&data.faces, &mut candidates);

        let named: HashSet<StudentId> = candidates.iter().flatten().copied().collect();
        let threshold = self.config.confirmation_threshold.max(1);

        self.streaks = named
            .iter()
            .map(|id| (*id, self.streaks.get(id).copied().unwrap_or(0) + 1))
            .collect();

        let mut confirmed = Vec::new();
        for (face, candidate) in data.faces.iter().zip(&candidates) {
            let Some(id) = *candidate else {
                continue;
            };
            if self.streak(id) < threshold {
                continue;
            }
            let name = self.label_for(id, face);
            if ledger.confirm(id, &name, now) {
                tracing::info!(student = %id, name = %name, "student confirmed present");
                confirmed.push(PresenceRecord {
                    student_id: id,
                    display_name: name,
                    confirmed_at: now,
                });
            }
        }

        self.observations = data
            .faces
            .iter()
            .zip(&candidates)
            .map(|(face, candidate)| {
                let (status, label) = match *candidate {
                    Some(id) if ledger.contains(id) => {
                        (ObservationStatus::Confirmed, self.label_for(id, face))
                    }
                    Some(id) => (ObservationStatus::Sighted, self.label_for(id, face)),
                    None => (ObservationStatus::Unknown, UNKNOWN_LABEL.to_string()),
                };
                FaceObservation {
                    face_box: FaceBox::from(face.face_box),
                    candidate: *candidate,
                    label,
                    status,
                    confidence: face.confidence,
                }
            })
            .collect();

        tracing::debug!(
            faces = data.faces.len(),
            named = named.len(),
            confirmed = confirmed.len(),
            "face_data applied"
        );

        confirmed
    }

    /// Candidate identity of a face, or `None` when it stays `Unknown`.
    fn resolve(&self, face: &FaceReport, data: &FaceData) -> Option<StudentId> {
        if face.status == ObservationStatus::Unknown {
            return None;
        }
        if let Some(confidence) = face.confidence {
            if confidence < self.config.min_candidate_confidence {
                return None;
            }
        }
        if face.id.is_some() {
            return face.id;
        }
        let key = normalize(&face.name);
        if key.is_empty() {
            return None;
        }
        data.newly_recognized
            .iter()
            .find(|s| normalize(&s.name) == key)
            .map(|s| s.id)
            .or_else(|| self.directory.get(&key).copied())
    }

    /// Two different identities on overlapping boxes: the higher reported
    /// confidence keeps its identity, otherwise the earlier face wins.
    fn break_overlap_ties(&self, faces: &[FaceReport], candidates: &mut [Option<StudentId>]) {
        for i in 0..faces.len() {
            for j in (i + 1)..faces.len() {
                let (Some(a), Some(b)) = (candidates[i], candidates[j]) else {
                    continue;
                };
                if a == b {
                    continue;
                }
                let overlap = FaceBox::from(faces[i].face_box).iou(&FaceBox::from(faces[j].face_box));
                if overlap < self.config.overlap_iou {
                    continue;
                }
                let later_wins = match (faces[i].confidence, faces[j].confidence) {
                    (Some(ci), Some(cj)) => cj > ci,
                    _ => false,
                };
                let (loser, kept, dropped) = if later_wins { (i, b, a) } else { (j, a, b) };
                tracing::debug!(
                    kept = %kept,
                    dropped = %dropped,
                    iou = overlap,
                    "overlapping faces with different identities"
                );
                candidates[loser] = None;
            }
        }
    }

    fn label_for(&self, student_id: StudentId, face: &FaceReport) -> String {
        if let Some(name) = self.display_names.get(&student_id) {
            return name.clone();
        }
        let name = face.name.trim();
        if name.is_empty() {
            student_id.to_string()
        } else {
            name.to_string()
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RecognizedStudent, WireBox};

    fn face(id: Option<u64>, name: &str, status: ObservationStatus, x: f32) -> FaceReport {
        FaceReport {
            face_box: WireBox {
                source_x: x,
                source_y: 10.0,
                source_w: 50.0,
                source_h: 50.0,
            },
            name: name.into(),
            status,
            confidence: None,
            id: id.map(StudentId),
        }
    }

    fn sighting(id: u64, name: &str) -> FaceData {
        FaceData {
            faces: vec![face(Some(id), name, ObservationStatus::Sighted, 10.0)],
            ..FaceData::default()
        }
    }

    fn tracker() -> (ObservationTracker, PresenceLedger) {
        (ObservationTracker::new(TrackerConfig::default()), PresenceLedger::new())
    }

    #[test]
    fn test_single_sighting_does_not_confirm() {
        let (mut tracker, mut ledger) = tracker();
        let now = Utc::now();

        let confirmed = tracker.apply(&sighting(1, "Ada"), &mut ledger, now);
        assert!(confirmed.is_empty());
        assert_eq!(tracker.observations()[0].status, ObservationStatus::Sighted);

        tracker.apply(&FaceData::default(), &mut ledger, now);
        assert!(ledger.is_empty());
        assert!(tracker.observations().is_empty());
    }

    #[test]
    fn test_two_consecutive_sightings_confirm_once() {
        let (mut tracker, mut ledger) = tracker();
        let now = Utc::now();

        tracker.apply(&sighting(1, "Ada"), &mut ledger, now);
        let confirmed = tracker.apply(&sighting(1, "Ada"), &mut ledger, now);

        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].student_id, StudentId(1));
        assert_eq!(confirmed[0].display_name, "Ada");
        assert_eq!(ledger.len(), 1);
        assert_eq!(tracker.observations()[0].status, ObservationStatus::Confirmed);
    }

    #[test]
    fn test_gap_resets_streak() {
        let (mut tracker, mut ledger) = tracker();
        let now = Utc::now();

        tracker.apply(&sighting(1, "Ada"), &mut ledger, now);
        tracker.apply(&FaceData::default(), &mut ledger, now);
        assert_eq!(tracker.streak(StudentId(1)), 0);
        tracker.apply(&sighting(1, "Ada"), &mut ledger, now);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_repeated_confirmations_notify_once() {
        let (mut tracker, mut ledger) = tracker();
        let now = Utc::now();
        let confirmed_msg = FaceData {
            faces: vec![face(Some(5), "Grace", ObservationStatus::Confirmed, 10.0)],
            newly_recognized: vec![RecognizedStudent {
                id: StudentId(5),
                name: "Grace".into(),
                confidence: None,
            }],
            total_recognized_count: Some(1),
        };

        let notifications: usize = (0..10)
            .map(|_| tracker.apply(&confirmed_msg, &mut ledger, now).len())
            .sum();

        assert_eq!(notifications, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_confirmed_student_stays_present() {
        let (mut tracker, mut ledger) = tracker();
        let now = Utc::now();
        tracker.apply(&sighting(1, "Ada"), &mut ledger, now);
        tracker.apply(&sighting(1, "Ada"), &mut ledger, now);

        for _ in 0..5 {
            tracker.apply(&FaceData::default(), &mut ledger, now);
        }
        assert!(ledger.contains(StudentId(1)));
        assert!(tracker.observations().is_empty());
    }

    #[test]
    fn test_unknown_face_never_counts() {
        let (mut tracker, mut ledger) = tracker();
        let now = Utc::now();
        let data = FaceData {
            faces: vec![face(None, "Unknown", ObservationStatus::Unknown, 10.0)],
            ..FaceData::default()
        };
        tracker.apply(&data, &mut ledger, now);
        tracker.apply(&data, &mut ledger, now);

        assert!(ledger.is_empty());
        let obs = &tracker.observations()[0];
        assert_eq!(obs.status, ObservationStatus::Unknown);
        assert_eq!(obs.candidate, None);
        assert_eq!(obs.label, "Unknown");
    }

    #[test]
    fn test_low_confidence_stays_unknown() {
        let mut tracker = ObservationTracker::new(TrackerConfig {
            min_candidate_confidence: 0.6,
            ..TrackerConfig::default()
        });
        let mut ledger = PresenceLedger::new();
        let mut data = sighting(1, "Ada");
        data.faces[0].confidence = Some(0.4);

        tracker.apply(&data, &mut ledger, Utc::now());
        tracker.apply(&data, &mut ledger, Utc::now());
        assert!(ledger.is_empty());
        assert_eq!(tracker.observations()[0].status, ObservationStatus::Unknown);
    }

    #[test]
    fn test_name_resolves_through_roster() {
        let (mut tracker, mut ledger) = tracker();
        tracker.seed_roster(&[RosterEntry {
            student_id: StudentId(12),
            display_name: "Alan Turing".into(),
            last_known_photo_ref: None,
        }]);
        let data = FaceData {
            faces: vec![face(None, " alan turing ", ObservationStatus::Sighted, 10.0)],
            ..FaceData::default()
        };

        tracker.apply(&data, &mut ledger, Utc::now());
        let confirmed = tracker.apply(&data, &mut ledger, Utc::now());
        assert_eq!(confirmed[0].student_id, StudentId(12));
        assert_eq!(confirmed[0].display_name, "Alan Turing");
    }

    #[test]
    fn test_name_resolves_through_newly_recognized() {
        let (mut tracker, mut ledger) = tracker();
        let data = FaceData {
            faces: vec![face(None, "Ada", ObservationStatus::Confirmed, 10.0)],
            newly_recognized: vec![RecognizedStudent {
                id: StudentId(3),
                name: "Ada".into(),
                confidence: Some(0.8),
            }],
            total_recognized_count: None,
        };
        tracker.apply(&data, &mut ledger, Utc::now());
        assert_eq!(tracker.observations()[0].candidate, Some(StudentId(3)));

        // The pairing is remembered for later responses without the list.
        let later = FaceData {
            faces: vec![face(None, "Ada", ObservationStatus::Confirmed, 10.0)],
            ..FaceData::default()
        };
        let confirmed = tracker.apply(&later, &mut ledger, Utc::now());
        assert_eq!(confirmed.len(), 1);
    }

    #[test]
    fn test_unresolvable_name_is_unknown() {
        let (mut tracker, mut ledger) = tracker();
        let data = FaceData {
            faces: vec![face(None, "Stranger", ObservationStatus::Sighted, 10.0)],
            ..FaceData::default()
        };
        tracker.apply(&data, &mut ledger, Utc::now());
        assert_eq!(tracker.observations()[0].status, ObservationStatus::Unknown);
    }

    #[test]
    fn test_duplicate_identity_in_one_frame_counts_once() {
        let (mut tracker, mut ledger) = tracker();
        let data = FaceData {
            faces: vec![
                face(Some(1), "Ada", ObservationStatus::Sighted, 0.0),
                face(Some(1), "Ada", ObservationStatus::Sighted, 200.0),
            ],
            ..FaceData::default()
        };
        tracker.apply(&data, &mut ledger, Utc::now());
        assert_eq!(tracker.streak(StudentId(1)), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_overlap_higher_confidence_wins() {
        let (mut tracker, mut ledger) = tracker();
        let mut a = face(Some(1), "Ada", ObservationStatus::Sighted, 10.0);
        let mut b = face(Some(2), "Alan", ObservationStatus::Sighted, 12.0);
        a.confidence = Some(0.55);
        b.confidence = Some(0.90);
        let data = FaceData {
            faces: vec![a, b],
            ..FaceData::default()
        };

        tracker.apply(&data, &mut ledger, Utc::now());
        tracker.apply(&data, &mut ledger, Utc::now());

        assert!(ledger.contains(StudentId(2)));
        assert!(!ledger.contains(StudentId(1)));
        assert_eq!(tracker.observations()[0].status, ObservationStatus::Unknown);
    }

    #[test]
    fn test_overlap_without_confidence_first_wins() {
        let (mut tracker, mut ledger) = tracker();
        let data = FaceData {
            faces: vec![
                face(Some(1), "Ada", ObservationStatus::Sighted, 10.0),
                face(Some(2), "Alan", ObservationStatus::Sighted, 12.0),
            ],
            ..FaceData::default()
        };

        tracker.apply(&data, &mut ledger, Utc::now());
        tracker.apply(&data, &mut ledger, Utc::now());

        assert!(ledger.contains(StudentId(1)));
        assert!(!ledger.contains(StudentId(2)));
    }

    #[test]
    fn test_clear_keeps_directory() {
        let (mut tracker, mut ledger) = tracker();
        tracker.seed_roster(&[RosterEntry {
            student_id: StudentId(4),
            display_name: "Grace".into(),
            last_known_photo_ref: None,
        }]);
        let data = FaceData {
            faces: vec![face(None, "Grace", ObservationStatus::Sighted, 10.0)],
            ..FaceData::default()
        };
        tracker.apply(&data, &mut ledger, Utc::now());
        tracker.clear();

        assert_eq!(tracker.streak(StudentId(4)), 0);
        assert!(tracker.observations().is_empty());
        tracker.apply(&data, &mut ledger, Utc::now());
        assert_eq!(tracker.observations()[0].candidate, Some(StudentId(4)));
    }

    #[test]
    fn test_threshold_of_three() {
        let mut tracker = ObservationTracker::new(TrackerConfig {
            confirmation_threshold: 3,
            ..TrackerConfig::default()
        });
        let mut ledger = PresenceLedger::new();
        tracker.apply(&sighting(1, "Ada"), &mut ledger, Utc::now());
        tracker.apply(&sighting(1, "Ada"), &mut ledger, Utc::now());
        assert!(ledger.is_empty());
        tracker.apply(&sighting(1, "Ada"), &mut ledger, Utc::now());
        assert_eq!(ledger.len(), 1);
    }
}
