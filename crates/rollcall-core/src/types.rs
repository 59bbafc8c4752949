use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Student identifier as issued by the roster service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub u64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Course identifier; also the path segment of the attendance channel URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub u64);

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel dimensions of a frame or display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Size of every frame sent to the recognition engine unless configured otherwise.
    pub const TRANSMITTED: FrameSize = FrameSize {
        width: 320,
        height: 240,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Face region in transmitted-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersection-over-Union with another box, 0.0 for degenerate boxes.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.width * self.height + other.width * other.height - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// One enrolled student, as read from the roster collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub student_id: StudentId,
    pub display_name: String,
    /// Reference to the enrolment photo, if the student has one.
    pub last_known_photo_ref: Option<String>,
}

/// A student confirmed present during the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub student_id: StudentId,
    pub display_name: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Tracking status of one reported face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationStatus {
    Sighted,
    Confirmed,
    /// Also any status string this client does not know.
    #[default]
    #[serde(other)]
    Unknown,
}

/// A face from the latest recognition response, resolved against session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub face_box: FaceBox,
    pub candidate: Option<StudentId>,
    /// Text drawn next to the box.
    pub label: String,
    pub status: ObservationStatus,
    pub confidence: Option<f32>,
}

/// Present/absent counts for a roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceTally {
    pub roster_size: usize,
    pub present: usize,
    pub absent: usize,
    pub absent_students: Vec<RosterEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = FaceBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area() {
        let a = FaceBox::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&StudentId(42)).unwrap(), "42");
        let id: CourseId = serde_json::from_str("7").unwrap();
        assert_eq!(id, CourseId(7));
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn test_frame_size_empty() {
        assert!(FrameSize::new(0, 240).is_empty());
        assert!(!FrameSize::TRANSMITTED.is_empty());
    }
}
