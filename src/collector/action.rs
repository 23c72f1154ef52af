//! Reference pose tracking and action derivation

use crate::transforms::{relative_action, FrameAlignment};
use crate::types::{Action, PoseState, GRIPPER_INDEX};

/// Derives actions relative to the first pose seen after warm-up
///
/// The reference is captured once per episode and never changes until
/// [`ActionTracker::reset`].
#[derive(Debug, Clone, Default)]
pub struct ActionTracker {
    alignment: FrameAlignment,
    reference: Option<PoseState>,
}

impl ActionTracker {
    pub fn new(alignment: FrameAlignment) -> Self {
        Self {
            alignment,
            reference: None,
        }
    }

    /// Forget the reference pose
    pub fn reset(&mut self) {
        self.reference = None;
    }

    /// The current reference pose, if one has been captured
    pub fn reference(&self) -> Option<&PoseState> {
        self.reference.as_ref()
    }

    pub fn alignment(&self) -> FrameAlignment {
        self.alignment
    }

    /// Action for `pose`
    ///
    /// The first call captures `pose` as the reference and yields the zero
    /// delta with the absolute gripper.
    pub fn derive(&mut self, pose: &PoseState) -> Action {
        let action = match &self.reference {
            None => {
                self.reference = Some(*pose);
                tracing::info!(
                    "Reference pose set: [{:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}]",
                    pose[0],
                    pose[1],
                    pose[2],
                    pose[3],
                    pose[4],
                    pose[5]
                );
                let mut zero = [0.0; 7];
                zero[GRIPPER_INDEX] = pose[GRIPPER_INDEX];
                zero
            }
            Some(reference) => relative_action(pose, reference),
        };
        self.alignment.apply(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pose_is_reference() {
        let mut tracker = ActionTracker::default();
        let p0 = [1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.8];
        let a0 = tracker.derive(&p0);
        assert_eq!(a0, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.8]);
        assert_eq!(tracker.reference(), Some(&p0));

        let p1 = [1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.2];
        let a1 = tracker.derive(&p1);
        for v in &a1[..6] {
            assert!(v.abs() < 1e-9);
        }
        assert_eq!(a1[6], 0.2);
        assert_eq!(tracker.reference(), Some(&p0));
    }

    #[test]
    fn test_reset_recaptures() {
        let mut tracker = ActionTracker::default();
        tracker.derive(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        tracker.reset();
        assert!(tracker.reference().is_none());
        let a = tracker.derive(&[5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(a[0], 0.0);
        assert_eq!(tracker.reference().unwrap()[0], 5.0);
    }

    #[test]
    fn test_alignment_applied() {
        let mut tracker = ActionTracker::new(FrameAlignment::Clockwise);
        tracker.derive(&[0.0; 7]);
        let a = tracker.derive(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.4]);
        // (x, y) -> (y, -x)
        assert!(a[0].abs() < 1e-12);
        assert!((a[1] + 1.0).abs() < 1e-12);
        assert_eq!(a[6], 0.4);
    }
}
