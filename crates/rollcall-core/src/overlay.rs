//! Overlay mapping from transmitted-frame coordinates to display coordinates.
//!
//! Stateless: recomputed from the current observations on every redraw.

use crate::types::{FaceBox, FaceObservation, FrameSize, ObservationStatus};
use serde::Serialize;

/// Label font size at 1:1 scale.
const LABEL_BASE_FONT_PX: f32 = 12.0;
/// Gap between the box edge and the label baseline, in frame pixels.
const LABEL_GAP_PX: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Text anchored at its baseline-left point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayLabel {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayItem {
    pub rect: OverlayRect,
    pub label: OverlayLabel,
    pub status: ObservationStatus,
}

/// Per-axis scale factors, or `None` if either surface has no area.
fn scale_factors(frame: FrameSize, display: FrameSize) -> Option<(f32, f32)> {
    if frame.is_empty() || display.is_empty() {
        return None;
    }
    Some((
        display.width as f32 / frame.width as f32,
        display.height as f32 / frame.height as f32,
    ))
}

/// Map one box into display space.
pub fn scale_box(face_box: &FaceBox, frame: FrameSize, display: FrameSize) -> Option<OverlayRect> {
    let (sx, sy) = scale_factors(frame, display)?;
    Some(OverlayRect {
        x: face_box.x * sx,
        y: face_box.y * sy,
        width: face_box.width * sx,
        height: face_box.height * sy,
    })
}

/// Map every observation to a drawable item. Empty when the display has no area.
pub fn render(observations: &[FaceObservation], frame: FrameSize, display: FrameSize) -> Vec<OverlayItem> {
    let Some((sx, sy)) = scale_factors(frame, display) else {
        return Vec::new();
    };

    observations
        .iter()
        .map(|obs| {
            let b = obs.face_box;
            // Above the box, or just inside its top edge when there is no room.
            let above = b.y - LABEL_GAP_PX;
            let baseline = if above - LABEL_BASE_FONT_PX < 0.0 {
                b.y + LABEL_BASE_FONT_PX + LABEL_GAP_PX
            } else {
                above
            };

            OverlayItem {
                rect: OverlayRect {
                    x: b.x * sx,
                    y: b.y * sy,
                    width: b.width * sx,
                    height: b.height * sy,
                },
                label: OverlayLabel {
                    text: obs.label.clone(),
                    x: b.x * sx,
                    y: baseline * sy,
                    font_size: LABEL_BASE_FONT_PX * sy,
                },
                status: obs.status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(b: FaceBox) -> FaceObservation {
        FaceObservation {
            face_box: b,
            candidate: None,
            label: "Ada".into(),
            status: ObservationStatus::Sighted,
            confidence: None,
        }
    }

    #[test]
    fn test_scale_box_double() {
        let rect = scale_box(
            &FaceBox::new(160.0, 120.0, 32.0, 24.0),
            FrameSize::TRANSMITTED,
            FrameSize::new(640, 480),
        )
        .unwrap();
        assert_eq!(
            rect,
            OverlayRect {
                x: 320.0,
                y: 240.0,
                width: 64.0,
                height: 48.0
            }
        );
    }

    #[test]
    fn test_scale_box_non_uniform() {
        let rect = scale_box(
            &FaceBox::new(32.0, 24.0, 32.0, 24.0),
            FrameSize::TRANSMITTED,
            FrameSize::new(160, 240),
        )
        .unwrap();
        assert!((rect.x - 16.0).abs() < 1e-6);
        assert!((rect.y - 24.0).abs() < 1e-6);
        assert!((rect.width - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_display_renders_nothing() {
        let obs = vec![observation(FaceBox::new(10.0, 10.0, 20.0, 20.0))];
        assert!(render(&obs, FrameSize::TRANSMITTED, FrameSize::new(0, 0)).is_empty());
        assert!(render(&obs, FrameSize::TRANSMITTED, FrameSize::new(640, 0)).is_empty());
        assert!(scale_box(&obs[0].face_box, FrameSize::TRANSMITTED, FrameSize::new(0, 480)).is_none());
    }

    #[test]
    fn test_label_above_box() {
        let obs = vec![observation(FaceBox::new(160.0, 120.0, 32.0, 24.0))];
        let items = render(&obs, FrameSize::TRANSMITTED, FrameSize::new(640, 480));
        assert_eq!(items.len(), 1);
        let label = &items[0].label;
        assert_eq!(label.text, "Ada");
        assert!((label.x - 320.0).abs() < 1e-6);
        assert!((label.y - (120.0 - LABEL_GAP_PX) * 2.0).abs() < 1e-6);
        assert!((label.font_size - 24.0).abs() < 1e-6);
    }

    #[test]
    fn test_label_inside_box_at_top_edge() {
        let obs = vec![observation(FaceBox::new(0.0, 2.0, 40.0, 40.0))];
        let items = render(&obs, FrameSize::TRANSMITTED, FrameSize::TRANSMITTED);
        assert!(items[0].label.y > items[0].rect.y);
    }
}
