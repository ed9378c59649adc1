//! Post-processing of raw detections across frames.
//!
//! Every frame runs through four stages in fixed order:
//! 1. Temporal smoothing: detections are appended to a bounded per-class history and one averaged
//!    detection is emitted per tracked class.
//! 2. Confidence thresholding of the smoothed detections.
//! 3. Class-agnostic non-maximum suppression.
//! 4. Eviction of history entries which are older than the object timeout.
use std::{
    cmp::Ordering,
    collections::{BTreeMap, VecDeque},
    time::{Duration, Instant},
};

use common::{iou, Bbox, Detection};

/// Tuning parameters of the [`DetectionProcessor`].
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorConfig {
    /// Smoothed detections below this score are dropped.
    pub confidence_threshold: f32,
    /// Detections overlapping a more confident one by more than this IoU are dropped.
    pub nms_threshold: f32,
    /// Maximum number of observations kept per class. With 0, nothing is tracked and no
    /// detection survives smoothing.
    pub history_length: usize,
    /// Observations at least this old are evicted.
    pub object_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.3,
            history_length: 5,
            object_timeout: Duration::from_millis(3000),
        }
    }
}

#[derive(Clone, Debug)]
struct Observation {
    score: f32,
    bbox: Bbox,
    seen_at: Instant,
}

/// Stateful smoother and filter for the detections of consecutive frames.
#[derive(Debug)]
pub struct DetectionProcessor {
    config: ProcessorConfig,
    history: BTreeMap<String, VecDeque<Observation>>,
}

impl DetectionProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            history: BTreeMap::new(),
        }
    }

    /// Run all post-processing stages on the raw detections of one frame.
    pub fn process(&mut self, detections: Vec<Detection>, now: Instant) -> Vec<Detection> {
        let smoothed = self.apply_temporal_smoothing(detections, now);
        let confident = self.apply_confidence_threshold(smoothed);
        let selected = self.apply_nms(confident);
        self.remove_timed_out(now);

        log::debug!(
            "Kept {} detections, tracking {} classes",
            selected.len(),
            self.history.len()
        );

        selected
    }

    /// Record the detections and emit the mean detection of every tracked class.
    pub fn apply_temporal_smoothing(
        &mut self,
        detections: Vec<Detection>,
        now: Instant,
    ) -> Vec<Detection> {
        let capacity = self.config.history_length;
        let detections = if capacity > 0 { detections } else { Vec::new() };

        for detection in detections {
            let observations = self
                .history
                .entry(detection.class)
                .or_insert_with(|| VecDeque::with_capacity(capacity));
            observations.push_back(Observation {
                score: detection.score,
                bbox: detection.bbox,
                seen_at: now,
            });
            while observations.len() > capacity {
                observations.pop_front();
            }
        }

        self.history
            .iter()
            .filter(|(_, observations)| !observations.is_empty())
            .map(|(class, observations)| {
                let count = observations.len() as f32;
                let mut score = 0.0;
                let mut bbox = [0.0; 4];
                for observation in observations {
                    score += observation.score;
                    for (sum, value) in bbox.iter_mut().zip(observation.bbox) {
                        *sum += value;
                    }
                }

                Detection {
                    class: class.clone(),
                    score: score / count,
                    bbox: bbox.map(|sum| sum / count),
                }
            })
            .collect()
    }

    /// Keep detections scoring at least the confidence threshold.
    pub fn apply_confidence_threshold(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|detection| detection.score >= self.config.confidence_threshold)
            .collect()
    }

    pub fn apply_nms(&self, detections: Vec<Detection>) -> Vec<Detection> {
        non_maximum_suppression(detections, self.config.nms_threshold)
    }

    /// Drop observations at least `object_timeout` old and forget classes without observations.
    pub fn remove_timed_out(&mut self, now: Instant) {
        let timeout = self.config.object_timeout;
        self.history.retain(|class, observations| {
            observations
                .retain(|observation| now.saturating_duration_since(observation.seen_at) < timeout);
            if observations.is_empty() {
                log::debug!("Forgetting {class}");
            }
            !observations.is_empty()
        });
    }

    /// Number of buffered observations for a class.
    pub fn history_len(&self, class: &str) -> usize {
        self.history.get(class).map_or(0, VecDeque::len)
    }

    /// Classes which currently have at least one buffered observation.
    pub fn tracked_classes(&self) -> impl Iterator<Item = &str> {
        self.history.keys().map(String::as_str)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Run non-maximum-suppression on candidate detections.
///
/// Candidates are visited in the order of sinking confidence. A candidate is selected only if its
/// IoU with every already selected detection is at most `max_iou`. Candidates with equal scores
/// keep their relative order.
pub fn non_maximum_suppression(mut detections: Vec<Detection>, max_iou: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut selected: Vec<Detection> = Vec::with_capacity(detections.len());
    'candidates: for candidate in detections {
        for kept in selected.iter() {
            if iou(&candidate.bbox, &kept.bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

#[cfg(test)]
mod test {

    use super::*;

    fn cat(score: f32, bbox: Bbox) -> Detection {
        Detection::new("cat", score, bbox)
    }

    fn processor() -> DetectionProcessor {
        DetectionProcessor::new(ProcessorConfig::default())
    }

    #[test]
    fn single_detection_passes_unchanged() {
        let mut processor = processor();
        let out = processor.process(vec![cat(0.9, [0.0, 0.0, 10.0, 10.0])], Instant::now());

        assert_eq!(out, vec![cat(0.9, [0.0, 0.0, 10.0, 10.0])]);
        assert_eq!(processor.history_len("cat"), 1);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping_pair() {
        let processor = processor();
        let out = processor.apply_nms(vec![
            cat(0.4, [1.0, 1.0, 10.0, 10.0]),
            cat(0.9, [0.0, 0.0, 10.0, 10.0]),
        ]);

        assert_eq!(out, vec![cat(0.9, [0.0, 0.0, 10.0, 10.0])]);
    }

    #[test]
    fn nms_keeps_disjoint_detections_in_score_order() {
        let out = non_maximum_suppression(
            vec![
                Detection::new("dog", 0.6, [50.0, 50.0, 10.0, 10.0]),
                cat(0.8, [0.0, 0.0, 10.0, 10.0]),
            ],
            0.3,
        );

        let classes: Vec<_> = out.iter().map(|d| d.class.as_str()).collect();
        assert_eq!(classes, ["cat", "dog"]);
    }

    #[test]
    fn nms_output_has_no_pair_above_threshold() {
        let max_iou = 0.3;
        let candidates: Vec<_> = (0..40)
            .map(|i| {
                let offset = (i % 7) as f32 * 3.0;
                let bbox = [offset, offset * 0.5, 12.0, 9.0];
                Detection::new(format!("c{i}"), 1.0 - i as f32 / 50.0, bbox)
            })
            .collect();

        let out = non_maximum_suppression(candidates, max_iou);

        assert!(!out.is_empty());
        for (i, a) in out.iter().enumerate() {
            for b in out.iter().skip(i + 1) {
                assert!(iou(&a.bbox, &b.bbox) <= max_iou);
            }
        }
    }

    #[test]
    fn same_class_in_one_frame_is_averaged() {
        let mut processor = processor();
        let out = processor.process(
            vec![cat(0.9, [0.0, 0.0, 10.0, 10.0]), cat(0.4, [1.0, 1.0, 10.0, 10.0])],
            Instant::now(),
        );

        assert_eq!(out.len(), 1);
        assert!((out[0].score - 0.65).abs() < 1e-6);
        assert_eq!(out[0].bbox, [0.5, 0.5, 10.0, 10.0]);
    }

    #[test]
    fn smoothing_averages_over_frames() {
        let mut processor = processor();
        let start = Instant::now();

        processor.process(vec![cat(1.0, [0.0, 0.0, 10.0, 10.0])], start);
        let out = processor.process(
            vec![cat(0.6, [10.0, 20.0, 30.0, 40.0])],
            start + Duration::from_millis(100),
        );

        assert_eq!(out, vec![cat(0.8, [5.0, 10.0, 20.0, 25.0])]);
    }

    #[test]
    fn low_confidence_is_dropped_but_remembered() {
        let mut processor = processor();
        let out = processor.process(vec![cat(0.2, [0.0, 0.0, 10.0, 10.0])], Instant::now());

        assert!(out.is_empty());
        assert_eq!(processor.history_len("cat"), 1);
    }

    #[test]
    fn threshold_is_inclusive() {
        let processor = processor();
        let out = processor.apply_confidence_threshold(vec![cat(0.5, [0.0, 0.0, 1.0, 1.0])]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut processor = DetectionProcessor::new(ProcessorConfig {
            history_length: 3,
            ..Default::default()
        });
        let start = Instant::now();

        for i in 0..20 {
            let now = start + Duration::from_millis(10 * i);
            processor.process(
                vec![cat(0.9, [0.0, 0.0, 10.0, 10.0]), cat(0.7, [0.0, 0.0, 10.0, 10.0])],
                now,
            );
            assert!(processor.history_len("cat") <= 3);
        }
        assert_eq!(processor.history_len("cat"), 3);
    }

    #[test]
    fn zero_history_length_tracks_nothing() {
        let mut processor = DetectionProcessor::new(ProcessorConfig {
            history_length: 0,
            ..Default::default()
        });

        let detections = processor.process(vec![cat(0.9, [0.0, 0.0, 10.0, 10.0])], Instant::now());

        assert!(detections.is_empty());
        assert_eq!(processor.history_len("cat"), 0);
        assert_eq!(processor.tracked_classes().count(), 0);
    }

    #[test]
    fn oldest_observation_is_dropped_on_overflow() {
        let mut processor = DetectionProcessor::new(ProcessorConfig {
            history_length: 2,
            ..Default::default()
        });
        let start = Instant::now();

        processor.process(vec![cat(0.1, [0.0, 0.0, 1.0, 1.0])], start);
        processor.process(vec![cat(0.9, [0.0, 0.0, 1.0, 1.0])], start);
        let out = processor.process(vec![cat(0.7, [0.0, 0.0, 1.0, 1.0])], start);

        assert!((out[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn stale_classes_are_evicted() {
        let mut processor = processor();
        let start = Instant::now();

        processor.process(vec![cat(0.9, [0.0, 0.0, 10.0, 10.0])], start);
        let out = processor.process(vec![], start + Duration::from_millis(1000));
        assert_eq!(out.len(), 1, "cat is still smoothed within the timeout");

        let out = processor.process(vec![], start + Duration::from_millis(3000));
        assert_eq!(out.len(), 1, "eviction runs after the smoothing pass");
        assert_eq!(processor.history_len("cat"), 0);
        assert_eq!(processor.tracked_classes().count(), 0);

        let out = processor.process(vec![], start + Duration::from_millis(3100));
        assert!(out.is_empty());
    }

    #[test]
    fn eviction_keeps_fresh_observations() {
        let mut processor = processor();
        let start = Instant::now();

        processor.process(vec![cat(0.9, [0.0, 0.0, 10.0, 10.0])], start);
        processor.process(
            vec![cat(0.7, [0.0, 0.0, 10.0, 10.0])],
            start + Duration::from_millis(2000),
        );
        processor.remove_timed_out(start + Duration::from_millis(3500));

        assert_eq!(processor.history_len("cat"), 1);
    }

    #[test]
    fn classes_are_smoothed_independently() {
        let mut processor = processor();
        let out = processor.process(
            vec![
                Detection::new("person", 0.95, [100.0, 0.0, 50.0, 120.0]),
                cat(0.9, [0.0, 0.0, 10.0, 10.0]),
            ],
            Instant::now(),
        );

        let classes: Vec<_> = out.iter().map(|d| d.class.as_str()).collect();
        assert_eq!(classes, ["person", "cat"]);
        assert_eq!(processor.tracked_classes().collect::<Vec<_>>(), ["cat", "person"]);

        processor.reset();
        assert_eq!(processor.history_len("person"), 0);
    }
}
