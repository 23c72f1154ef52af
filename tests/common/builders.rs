//! Test data builders for creating episodes

use ndarray::Array3;
use teleop_rec::episode::{Episode, Metadata};
use teleop_rec::types::{Frame, Modality, PoseState, Stamped};

/// Builder for recorded episodes with a fixed cycle period
///
/// Each frame's sensor timestamps sit a few milliseconds after its loop
/// timestamp, in camera, pose, force order, as the collector records them.
pub struct EpisodeBuilder {
    start: f64,
    period: f64,
    frames: usize,
    image_size: Option<(usize, usize)>,
    pose: bool,
    force: bool,
    force_every: usize,
}

impl EpisodeBuilder {
    pub fn new(frames: usize) -> Self {
        Self {
            start: 1_700_000_000.0,
            period: 0.05,
            frames,
            image_size: None,
            pose: true,
            force: true,
            force_every: 1,
        }
    }

    pub fn period(mut self, period: f64) -> Self {
        self.period = period;
        self
    }

    pub fn with_camera(mut self, width: usize, height: usize) -> Self {
        self.image_size = Some((width, height));
        self
    }

    pub fn without_pose(mut self) -> Self {
        self.pose = false;
        self
    }

    pub fn without_force(mut self) -> Self {
        self.force = false;
        self
    }

    /// Only record force on every `n`th frame
    pub fn force_every(mut self, n: usize) -> Self {
        self.force_every = n.max(1);
        self
    }

    pub fn frame(&self, i: usize) -> Frame {
        let t = self.start + i as f64 * self.period;
        let mut frame = Frame::new(t);
        if let Some((w, h)) = self.image_size {
            let image = Array3::from_elem((h, w, 3), (i % 256) as u8);
            frame.image = Some(Stamped::new(image, t + 0.001));
        }
        if self.pose {
            let pose: PoseState = [0.01 * i as f64, 0.0, 0.3, 0.0, 0.0, 0.02 * i as f64, 0.5];
            frame.state = Some(Stamped::new(pose, t + 0.002));
            frame.action = Some([0.01 * i as f64, 0.0, 0.0, 0.0, 0.0, 0.02 * i as f64, 0.5]);
        }
        if self.force && i % self.force_every == 0 {
            frame.force = Some(Stamped::new([i as f64, 0.0, -1.0, 0.0, 0.0, 0.1], t + 0.003));
        }
        frame
    }

    pub fn build(self) -> Episode {
        let mut episode = Episode::starting_at(self.start, Metadata::new());
        for i in 0..self.frames {
            episode
                .append(self.frame(i))
                .expect("builder frames are consistent");
        }
        episode.finalize_at(self.start + self.frames as f64 * self.period);
        episode
    }
}

/// Number of samples the builder will record for a modality
pub fn expected_len(builder: &EpisodeBuilder, modality: Modality) -> usize {
    (0..builder.frames)
        .filter(|&i| builder.frame(i).has(modality))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_builder() {
        let episode = EpisodeBuilder::new(4).with_camera(8, 6).force_every(2).build();
        assert_eq!(episode.len(), 4);
        assert_eq!(episode.modality_len(Modality::Camera), 4);
        assert_eq!(episode.modality_len(Modality::Force), 2);
        assert!(episode.is_finalized());
    }
}
