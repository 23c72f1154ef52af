//! Timing analysis for recorded episodes
//!
//! Diagnoses loop jitter, per-sensor acquisition rates and inter-sensor
//! delays from the timestamps stored in a [`PersistedEpisode`]. All
//! durations in the report are in seconds; the `Display` impls render
//! milliseconds.

use crate::storage::PersistedEpisode;
use crate::types::Modality;
use std::fmt;

/// Intervals further than this many standard deviations from the mean are outliers
pub const OUTLIER_SIGMA: f64 = 3.0;

/// Mean and spread of a series of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl SeriesStats {
    /// Statistics of `values`, `None` when empty
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(Self {
            count: values.len(),
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median,
        })
    }
}

fn diffs(ts: &[f64]) -> Vec<f64> {
    ts.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Grade assigned from the loop jitter percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_jitter_percent(jitter: f64) -> Self {
        if jitter < 5.0 {
            QualityGrade::Excellent
        } else if jitter < 10.0 {
            QualityGrade::Good
        } else if jitter < 20.0 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityGrade::Excellent => write!(f, "excellent"),
            QualityGrade::Good => write!(f, "good"),
            QualityGrade::Fair => write!(f, "fair"),
            QualityGrade::Poor => write!(f, "poor"),
        }
    }
}

/// Quality of the loop timestamp sequence
#[derive(Debug, Clone)]
pub struct TimingQuality {
    pub num_frames: usize,
    pub duration: f64,
    pub actual_fps: f64,
    pub intervals: SeriesStats,
    /// Indices into the interval sequence
    pub outliers: Vec<usize>,
    /// Interval std as a percentage of the mean
    pub jitter_percent: f64,
    pub grade: QualityGrade,
}

impl TimingQuality {
    /// `None` when fewer than two timestamps are available
    pub fn from_timestamps(ts: &[f64]) -> Option<Self> {
        let intervals = diffs(ts);
        let stats = SeriesStats::from_values(&intervals)?;
        let duration = ts[ts.len() - 1] - ts[0];
        let actual_fps = if duration > 0.0 {
            ts.len() as f64 / duration
        } else {
            0.0
        };
        let outliers = intervals
            .iter()
            .enumerate()
            .filter(|(_, v)| (*v - stats.mean).abs() > OUTLIER_SIGMA * stats.std)
            .map(|(i, _)| i)
            .collect();
        let jitter_percent = if stats.mean > 0.0 {
            stats.std / stats.mean * 100.0
        } else {
            f64::INFINITY
        };

        Some(Self {
            num_frames: ts.len(),
            duration,
            actual_fps,
            intervals: stats,
            outliers,
            jitter_percent,
            grade: QualityGrade::from_jitter_percent(jitter_percent),
        })
    }
}

/// Acquisition statistics of a single sensor
#[derive(Debug, Clone)]
pub struct SensorTiming {
    pub modality: Modality,
    pub samples: usize,
    pub intervals: SeriesStats,
    pub fps: f64,
    /// Delay of each sample from the loop timestamp over the common prefix
    pub loop_delay: Option<SeriesStats>,
}

/// Delay between two sensors over their common prefix
#[derive(Debug, Clone)]
pub struct SensorDelay {
    pub from: Modality,
    pub to: Modality,
    pub delay: SeriesStats,
}

/// Full timing report for one episode
#[derive(Debug, Clone)]
pub struct EpisodeReport {
    pub loop_timing: Option<TimingQuality>,
    pub sensors: Vec<SensorTiming>,
    pub delays: Vec<SensorDelay>,
}

impl EpisodeReport {
    /// True when any per-sensor timestamps were recorded
    pub fn has_sensor_timestamps(&self) -> bool {
        !self.sensors.is_empty()
    }

    pub fn sensor(&self, modality: Modality) -> Option<&SensorTiming> {
        self.sensors.iter().find(|s| s.modality == modality)
    }
}

fn prefix_delay(later: &[f64], earlier: &[f64]) -> Option<SeriesStats> {
    let n = later.len().min(earlier.len());
    let delays: Vec<f64> = (0..n).map(|i| later[i] - earlier[i]).collect();
    SeriesStats::from_values(&delays)
}

/// Analyze the timestamps of an episode
pub fn analyze(episode: &PersistedEpisode) -> EpisodeReport {
    let loop_ts = episode.timestamp.to_vec();
    let loop_timing = TimingQuality::from_timestamps(&loop_ts);

    let sensor_ts = |m: Modality| episode.modality_timestamps(m).to_vec();

    let sensors = Modality::ALL
        .into_iter()
        .filter_map(|m| {
            let ts = sensor_ts(m);
            let intervals = SeriesStats::from_values(&diffs(&ts))?;
            let fps = if intervals.mean > 0.0 {
                1.0 / intervals.mean
            } else {
                0.0
            };
            Some(SensorTiming {
                modality: m,
                samples: ts.len(),
                intervals,
                fps,
                loop_delay: prefix_delay(&ts, &loop_ts),
            })
        })
        .collect();

    let delays = [
        (Modality::Camera, Modality::Pose),
        (Modality::Pose, Modality::Force),
    ]
    .into_iter()
    .filter_map(|(from, to)| {
        let delay = prefix_delay(&sensor_ts(to), &sensor_ts(from))?;
        Some(SensorDelay { from, to, delay })
    })
    .collect();

    EpisodeReport {
        loop_timing,
        sensors,
        delays,
    }
}

impl fmt::Display for EpisodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MS: f64 = 1000.0;
        match &self.loop_timing {
            Some(t) => {
                writeln!(f, "Frames:    {}", t.num_frames)?;
                writeln!(f, "Duration:  {:.2}s", t.duration)?;
                writeln!(f, "FPS:       {:.2}", t.actual_fps)?;
                writeln!(
                    f,
                    "Interval:  {:.2} ± {:.2}ms (min {:.2}, max {:.2}, median {:.2})",
                    t.intervals.mean * MS,
                    t.intervals.std * MS,
                    t.intervals.min * MS,
                    t.intervals.max * MS,
                    t.intervals.median * MS
                )?;
                writeln!(
                    f,
                    "Outliers:  {} / {} (>{}σ)",
                    t.outliers.len(),
                    t.intervals.count,
                    OUTLIER_SIGMA
                )?;
                writeln!(f, "Jitter:    {:.2}% ({})", t.jitter_percent, t.grade)?;
            }
            None => writeln!(f, "Not enough loop timestamps for timing analysis")?,
        }

        if !self.has_sensor_timestamps() {
            return writeln!(f, "No per-sensor timestamps recorded");
        }
        for s in &self.sensors {
            write!(
                f,
                "{:<7} {} samples, {:.2} ± {:.2}ms ({:.2} fps)",
                s.modality,
                s.samples,
                s.intervals.mean * MS,
                s.intervals.std * MS,
                s.fps
            )?;
            if let Some(d) = &s.loop_delay {
                write!(f, ", loop delay {:.2} ± {:.2}ms", d.mean * MS, d.std * MS)?;
            }
            writeln!(f)?;
        }
        for d in &self.delays {
            writeln!(
                f,
                "{}-{} delay: {:.2} ± {:.2}ms",
                d.to,
                d.from,
                d.delay.mean * MS,
                d.delay.std * MS
            )?;
        }
        Ok(())
    }
}
