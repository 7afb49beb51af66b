//! Rolling per-metric history.
//!
//! Every delivered [`Reading`] contributes one timestamped sample to each of three
//! windows (temperature, light, sound). Windows are capacity-bounded FIFOs: once full,
//! the oldest sample is evicted before the newest is appended. At the nominal one
//! reading per second, the default capacity of 300 covers five minutes.

use crate::reading::Reading;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// One timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    /// When the reading was accumulated.
    pub timestamp: DateTime<Utc>,
    /// Metric value.
    pub value: f64,
}

/// Metrics tracked over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Primary temperature (`t`).
    Temperature,
    /// Light level (`l`).
    Light,
    /// Sound level (`s`).
    Sound,
}

impl Metric {
    /// All tracked metrics, in display order.
    pub const ALL: [Metric; 3] = [Metric::Temperature, Metric::Light, Metric::Sound];

    /// Pick this metric's value out of a reading.
    pub fn value(self, reading: &Reading) -> f64 {
        match self {
            Metric::Temperature => reading.temperature,
            Metric::Light => reading.light,
            Metric::Sound => reading.sound,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Temperature => write!(f, "temperature"),
            Metric::Light => write!(f, "light"),
            Metric::Sound => write!(f, "sound"),
        }
    }
}

/// Fixed-capacity FIFO of samples for one metric.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryWindow {
    points: VecDeque<HistoryPoint>,
    #[serde(skip)]
    capacity: usize,
}

impl HistoryWindow {
    /// Create an empty window.
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting from the front once full.
    pub fn push(&mut self, point: HistoryPoint) {
        if self.capacity == 0 {
            return;
        }
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no samples are held.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Maximum number of samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    /// Newest sample.
    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    /// Oldest sample still held.
    pub fn oldest(&self) -> Option<&HistoryPoint> {
        self.points.front()
    }

    /// Smallest and largest value held.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.points.iter().fold(None, |acc, p| match acc {
            None => Some((p.value, p.value)),
            Some((lo, hi)) => Some((lo.min(p.value), hi.max(p.value))),
        })
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// The three metric windows for one dashboard session.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryAccumulator {
    temperature: HistoryWindow,
    light: HistoryWindow,
    sound: HistoryWindow,
}

impl HistoryAccumulator {
    /// Create empty windows of the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            temperature: HistoryWindow::new(capacity),
            light: HistoryWindow::new(capacity),
            sound: HistoryWindow::new(capacity),
        }
    }

    /// Append one sample per metric, stamped with the current time.
    pub fn add_data_point(&mut self, reading: &Reading) {
        self.add_data_point_at(reading, Utc::now());
    }

    /// Append one sample per metric with an explicit timestamp.
    pub fn add_data_point_at(&mut self, reading: &Reading, timestamp: DateTime<Utc>) {
        for metric in Metric::ALL {
            let point = HistoryPoint {
                timestamp,
                value: metric.value(reading),
            };
            self.window_mut(metric).push(point);
        }
    }

    /// Empty all three windows.
    pub fn clear(&mut self) {
        for metric in Metric::ALL {
            self.window_mut(metric).clear();
        }
    }

    /// Read-only view of one metric's window.
    pub fn window(&self, metric: Metric) -> &HistoryWindow {
        match metric {
            Metric::Temperature => &self.temperature,
            Metric::Light => &self.light,
            Metric::Sound => &self.sound,
        }
    }

    fn window_mut(&mut self, metric: Metric) -> &mut HistoryWindow {
        match metric {
            Metric::Temperature => &mut self.temperature,
            Metric::Light => &mut self.light,
            Metric::Sound => &mut self.sound,
        }
    }
}

impl Default for HistoryAccumulator {
    fn default() -> Self {
        Self::new(300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading(t: f64, l: f64, s: f64) -> Reading {
        Reading {
            temperature: t,
            light: l,
            compass: 0.0,
            sound: s,
            storm: 0.0,
            ultra_temperature: t,
        }
    }

    #[test]
    fn each_metric_gets_its_field() {
        let mut history = HistoryAccumulator::new(300);
        history.add_data_point(&reading(21.5, 120.0, 30.0));

        assert_eq!(history.window(Metric::Temperature).latest().unwrap().value, 21.5);
        assert_eq!(history.window(Metric::Light).latest().unwrap().value, 120.0);
        assert_eq!(history.window(Metric::Sound).latest().unwrap().value, 30.0);
    }

    #[test]
    fn windows_never_exceed_capacity_and_evict_oldest() {
        let mut history = HistoryAccumulator::new(300);
        let start = Utc::now();

        for i in 0..450 {
            let at = start + Duration::seconds(i);
            history.add_data_point_at(&reading(i as f64, 0.0, 0.0), at);
            for metric in Metric::ALL {
                assert!(history.window(metric).len() <= 300);
            }
        }

        let window = history.window(Metric::Temperature);
        assert_eq!(window.len(), 300);
        assert_eq!(window.oldest().unwrap().value, 150.0);
        assert_eq!(window.latest().unwrap().value, 449.0);
        assert_eq!(window.latest().unwrap().timestamp, start + Duration::seconds(449));

        let values: Vec<f64> = window.iter().map(|p| p.value).collect();
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn clear_empties_all_windows() {
        let mut history = HistoryAccumulator::default();
        history.add_data_point(&reading(1.0, 2.0, 3.0));
        history.clear();
        for metric in Metric::ALL {
            assert!(history.window(metric).is_empty());
            assert_eq!(history.window(metric).capacity(), 300);
        }
    }

    #[test]
    fn window_range() {
        let mut window = HistoryWindow::new(4);
        assert_eq!(window.range(), None);
        for value in [3.0, -1.0, 7.5] {
            window.push(HistoryPoint {
                timestamp: Utc::now(),
                value,
            });
        }
        assert_eq!(window.range(), Some((-1.0, 7.5)));
    }
}
