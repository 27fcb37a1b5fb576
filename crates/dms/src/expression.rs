//! Geometric mouth expression classifier
//!
//! YAWN / LAUGH / SMILE / NEUTRAL from smoothed MAR and mouth width relative
//! to a per-session neutral width, with an OBSCURED guard for hands in front
//! of the mouth. Output is the majority label of the last few frames.

use crate::config::ExpressionConfig;
use crate::frame::{hand_near_mouth, HandLandmarks};
use crate::state::ExpressionLabel;
use ring_buffer::RingBuffer;
use signal_filter::{AspectRatio, Ema, MouthAspectRatio, Point2, SignalSmoother};
use std::collections::HashMap;
use tracing::debug;

/// Priority used to break majority-vote ties; Neutral wins
fn tie_rank(label: ExpressionLabel) -> u8 {
    match label {
        ExpressionLabel::Neutral => 0,
        ExpressionLabel::Obscured => 1,
        ExpressionLabel::Smile => 2,
        ExpressionLabel::Laugh => 3,
        ExpressionLabel::Yawn => 4,
    }
}

pub struct ExpressionClassifier {
    config: ExpressionConfig,
    ema_mar: Ema,
    ema_width_ratio: Ema,
    neutral_width: Option<f64>,
    frames_seen: usize,
    raw_mar: RingBuffer<f64>,
    history: RingBuffer<ExpressionLabel>,
}

impl ExpressionClassifier {
    pub fn new(config: ExpressionConfig) -> Self {
        Self {
            ema_mar: Ema::with_initial(config.ema_alpha, 0.0),
            ema_width_ratio: Ema::with_initial(config.ema_alpha, 1.0),
            neutral_width: None,
            frames_seen: 0,
            raw_mar: RingBuffer::new(config.persist_frames + 1),
            history: RingBuffer::new(config.persist_frames),
            config,
        }
    }

    /// Largest absolute frame-to-frame MAR change over the recent window
    fn mar_velocity(&self) -> f64 {
        self.raw_mar
            .iter()
            .zip(self.raw_mar.iter().skip(1))
            .map(|(a, b)| (b - a).abs())
            .fold(0.0, f64::max)
    }

    /// Classify one frame and return the stabilized label
    pub fn classify(
        &mut self,
        mouth: Option<&[Point2; 6]>,
        hands: Option<&[HandLandmarks]>,
    ) -> ExpressionLabel {
        let Some(mouth) = mouth else {
            self.history.push(ExpressionLabel::Neutral);
            return self.stable_label();
        };
        self.frames_seen += 1;

        let mar = MouthAspectRatio.calculate(mouth);
        let width = mouth[0].distance(&mouth[3]);

        let neutral = match self.neutral_width {
            None => width,
            Some(w) if self.frames_seen <= self.config.baseline_frames => w.max(width),
            Some(w) => w,
        };
        self.neutral_width = Some(neutral);
        let width_ratio = width / neutral.max(1e-6);

        let mar_smooth = self.ema_mar.update(mar);
        let width_smooth = self.ema_width_ratio.update(width_ratio);
        self.raw_mar.push(mar);

        if let Some(hands) = hands {
            if hand_near_mouth(mouth, hands, self.config.hand_mouth_radius) {
                self.history.push(ExpressionLabel::Obscured);
                return self.stable_label();
            }
        }

        let c = &self.config;
        let label = if mar_smooth > c.yawn_mar {
            ExpressionLabel::Yawn
        } else if mar_smooth > c.laugh_mar
            && width_smooth > c.laugh_width_ratio
            && self.mar_velocity() >= c.laugh_velocity
        {
            ExpressionLabel::Laugh
        } else if width_smooth > c.smile_width_ratio && mar_smooth < c.smile_mar {
            ExpressionLabel::Smile
        } else {
            ExpressionLabel::Neutral
        };

        self.history.push(label);
        let stable = self.stable_label();
        if stable != label {
            debug!(raw = label.as_str(), stable = stable.as_str(), "Expression held by vote");
        }
        stable
    }

    /// Majority label over the vote window
    pub fn stable_label(&self) -> ExpressionLabel {
        let mut counts: HashMap<ExpressionLabel, usize> = HashMap::new();
        for &label in self.history.iter() {
            *counts.entry(label).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then(tie_rank(*b).cmp(&tie_rank(*a))))
            .map(|(label, _)| label)
            .unwrap_or_default()
    }

    /// Forget the session baseline (new driver)
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::hand;

    /// Mouth of a given width and opening centered at (0.5, 0.6)
    fn mouth(width: f64, open: f64) -> [Point2; 6] {
        let (cx, cy) = (0.5, 0.6);
        let half = width / 2.0;
        let v = open * width / 2.0;
        [
            Point2::new(cx - half, cy),
            Point2::new(cx - half / 3.0, cy - v),
            Point2::new(cx + half / 3.0, cy - v),
            Point2::new(cx + half, cy),
            Point2::new(cx + half / 3.0, cy + v),
            Point2::new(cx - half / 3.0, cy + v),
        ]
    }

    #[test]
    fn test_neutral_then_yawn() {
        let mut classifier = ExpressionClassifier::new(ExpressionConfig::default());
        for _ in 0..10 {
            assert_eq!(
                classifier.classify(Some(&mouth(0.1, 0.1)), None),
                ExpressionLabel::Neutral
            );
        }

        let mut label = ExpressionLabel::Neutral;
        for _ in 0..20 {
            label = classifier.classify(Some(&mouth(0.1, 0.9)), None);
        }
        assert_eq!(label, ExpressionLabel::Yawn);
    }

    #[test]
    fn test_smile_detected_from_wider_mouth() {
        let mut classifier = ExpressionClassifier::new(ExpressionConfig::default());
        for _ in 0..30 {
            classifier.classify(Some(&mouth(0.1, 0.1)), None);
        }
        let mut label = ExpressionLabel::Neutral;
        for _ in 0..20 {
            label = classifier.classify(Some(&mouth(0.13, 0.1)), None);
        }
        assert_eq!(label, ExpressionLabel::Smile);
    }

    #[test]
    fn test_hand_over_mouth_is_obscured() {
        let mut classifier = ExpressionClassifier::new(ExpressionConfig::default());
        let covering = [hand((0.5, 0.9), (0.5, 0.62))];
        let mut label = ExpressionLabel::Neutral;
        for _ in 0..6 {
            label = classifier.classify(Some(&mouth(0.1, 0.9)), Some(&covering));
        }
        assert_eq!(label, ExpressionLabel::Obscured);
    }

    #[test]
    fn test_single_frame_flicker_is_voted_out() {
        let mut classifier = ExpressionClassifier::new(ExpressionConfig {
            ema_alpha: 1.0,
            ..ExpressionConfig::default()
        });
        for _ in 0..6 {
            classifier.classify(Some(&mouth(0.1, 0.1)), None);
        }
        let label = classifier.classify(Some(&mouth(0.1, 0.9)), None);
        assert_eq!(label, ExpressionLabel::Neutral);
    }

    #[test]
    fn test_missing_mouth_votes_neutral() {
        let mut classifier = ExpressionClassifier::new(ExpressionConfig::default());
        assert_eq!(classifier.classify(None, None), ExpressionLabel::Neutral);
    }
}
