//! Distraction state machine
//!
//! Head pose deltas from the expected resting pose and a held phone are
//! voted over a short window; hand-zone flags only refine the reason. A
//! stable vote held longer than `time_threshold_sec` confirms the
//! distraction and emits one event.

use crate::config::DistractionConfig;
use crate::frame::HandZones;
use crate::state::DistractionReason;
use ring_buffer::FlagWindow;
use serde::Serialize;
use signal_filter::{HeadPose, Validator};
use tracing::{debug, info, warn};

/// Confirmation edge payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistractionEvent {
    pub reason: DistractionReason,
    pub duration_sec: f64,
    /// Offending angle delta (degrees) or off-wheel hand count
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DistractionOutput {
    /// Stable vote, timer running
    pub looking_away: bool,
    /// Timer crossed the threshold
    pub distracted: bool,
    pub reason: Option<DistractionReason>,
    pub duration_sec: f64,
    pub event: Option<DistractionEvent>,
}

/// Snapshot for UI overlays
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistractionStatus {
    pub deltas: Option<HeadPose>,
    pub is_distracted: bool,
    pub duration_sec: f64,
    pub total_distractions: u64,
    pub holding_phone: bool,
    pub hands_on_wheel: usize,
}

pub struct DistractionStateMachine {
    config: DistractionConfig,
    validator: Validator,
    expected: HeadPose,
    votes: FlagWindow,
    stable_since: Option<f64>,
    confirmed: bool,
    reason: Option<(DistractionReason, f64)>,
    last_deltas: Option<HeadPose>,
    last_hands: HandZones,
    last_ts: f64,
    total_distractions: u64,
}

impl DistractionStateMachine {
    pub fn new(config: &DistractionConfig) -> Self {
        info!(
            expected_pitch = config.expected_pitch_deg,
            expected_yaw = config.expected_yaw_deg,
            yaw_limit = config.yaw_threshold_deg,
            pitch_down_limit = config.pitch_down_threshold_deg,
            pitch_up_limit = config.pitch_up_threshold_deg,
            "Distraction detector ready"
        );
        Self {
            expected: HeadPose::new(
                config.expected_pitch_deg,
                config.expected_yaw_deg,
                config.expected_roll_deg,
            ),
            validator: Validator::default(),
            votes: FlagWindow::new(config.vote_window),
            stable_since: None,
            confirmed: false,
            reason: None,
            last_deltas: None,
            last_hands: HandZones::default(),
            last_ts: 0.0,
            total_distractions: 0,
            config: config.clone(),
        }
    }

    /// Move the expected resting pose (camera mount changed)
    pub fn adjust_camera_offset(&mut self, pitch_offset: Option<f64>, yaw_offset: Option<f64>) {
        if let Some(pitch) = pitch_offset {
            self.expected.pitch = pitch;
            info!(pitch, "Camera pitch offset adjusted");
        }
        if let Some(yaw) = yaw_offset {
            self.expected.yaw = yaw;
            info!(yaw, "Camera yaw offset adjusted");
        }
    }

    pub fn expected_pose(&self) -> HeadPose {
        self.expected
    }

    pub fn total_distractions(&self) -> u64 {
        self.total_distractions
    }

    pub fn status(&self) -> DistractionStatus {
        DistractionStatus {
            deltas: self.last_deltas,
            is_distracted: self.confirmed,
            duration_sec: self.stable_since.map(|t| self.last_ts - t).unwrap_or(0.0),
            total_distractions: self.total_distractions,
            holding_phone: self.last_hands.phone,
            hands_on_wheel: self.last_hands.on_wheel,
        }
    }

    pub fn reset(&mut self) {
        self.votes.clear();
        self.stable_since = None;
        self.confirmed = false;
        self.reason = None;
        self.last_deltas = None;
        self.last_hands = HandZones::default();
    }

    /// Highest-priority violation for this frame and its magnitude
    ///
    /// Only a phone or a head-pose violation votes; hands off the wheel
    /// then upgrade the reason of a frame that already votes.
    fn classify(&self, deltas: &HeadPose, hands: &HandZones) -> Option<(DistractionReason, f64)> {
        if hands.phone {
            return Some((DistractionReason::Phone, 1.0));
        }
        let pose = self.pose_violation(deltas)?;
        if hands.visible >= 2 && hands.on_wheel == 0 {
            return Some((DistractionReason::BothHands, hands.visible as f64));
        }
        if hands.off_wheel() >= 1 {
            return Some((DistractionReason::OneHand, hands.off_wheel() as f64));
        }
        Some(pose)
    }

    fn pose_violation(&self, deltas: &HeadPose) -> Option<(DistractionReason, f64)> {
        let c = &self.config;
        if deltas.yaw.abs() > c.yaw_threshold_deg {
            return Some((DistractionReason::Aside, deltas.yaw.abs()));
        }
        if deltas.pitch > c.pitch_down_threshold_deg {
            return Some((DistractionReason::Down, deltas.pitch));
        }
        if deltas.pitch < -c.pitch_up_threshold_deg {
            return Some((DistractionReason::Up, deltas.pitch.abs()));
        }
        if deltas.roll.abs() > c.roll_threshold_deg {
            return Some((DistractionReason::Roll, deltas.roll.abs()));
        }
        None
    }

    pub fn update(&mut self, timestamp_sec: f64, pose: Option<HeadPose>, hands: HandZones) -> DistractionOutput {
        self.last_ts = timestamp_sec;
        self.last_hands = hands;

        let valid_pose = pose.filter(|p| match self.validator.validate_pose(p) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Pose rejected");
                false
            }
        });
        let Some(pose) = valid_pose else {
            self.votes.push(false);
            self.last_deltas = None;
            return self.settle(timestamp_sec);
        };

        let deltas = pose.delta_from(&self.expected);
        self.last_deltas = Some(deltas);

        let violation = self.classify(&deltas, &hands);
        self.votes.push(violation.is_some());
        if violation.is_some() {
            self.reason = violation;
        }
        self.settle(timestamp_sec)
    }

    /// Apply the stability vote and the sustained-duration timer
    fn settle(&mut self, timestamp_sec: f64) -> DistractionOutput {
        if self.votes.count_true() < self.config.vote_min_true {
            if self.stable_since.take().is_some() {
                debug!(confirmed = self.confirmed, "Distraction cleared");
            }
            self.confirmed = false;
            self.reason = None;
            return DistractionOutput::default();
        }

        let since = *self.stable_since.get_or_insert(timestamp_sec);
        let elapsed = timestamp_sec - since;
        let reason = self.reason.map(|(r, _)| r);

        let mut event = None;
        if elapsed > self.config.time_threshold_sec && !self.confirmed {
            self.confirmed = true;
            self.total_distractions += 1;
            if let Some((reason, value)) = self.reason {
                warn!(
                    reason = reason.code(),
                    duration_sec = elapsed,
                    value,
                    total = self.total_distractions,
                    "Distraction confirmed"
                );
                event = Some(DistractionEvent {
                    reason,
                    duration_sec: elapsed,
                    value,
                });
            }
        }

        DistractionOutput {
            looking_away: true,
            distracted: self.confirmed,
            reason,
            duration_sec: elapsed,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandZoneConfig;
    use crate::frame::tests::hand;

    fn machine() -> DistractionStateMachine {
        DistractionStateMachine::new(&DistractionConfig::default())
    }

    /// 25 fps timestamps
    fn at(frame: usize) -> f64 {
        frame as f64 * 0.04
    }

    fn forward() -> Option<HeadPose> {
        Some(HeadPose::new(2.0, 3.0, 1.0))
    }

    #[test]
    fn test_short_glance_never_confirms() {
        let mut m = machine();
        let mut outputs = Vec::new();
        for i in 0..5 {
            outputs.push(m.update(at(i), Some(HeadPose::new(0.0, 50.0, 0.0)), HandZones::default()));
        }
        for i in 5..10 {
            outputs.push(m.update(at(i), forward(), HandZones::default()));
        }
        assert!(outputs[4].looking_away);
        assert_eq!(outputs[4].reason, Some(DistractionReason::Aside));
        assert!(outputs.iter().all(|o| !o.distracted && o.event.is_none()));
        assert!(!outputs[9].looking_away);
        assert_eq!(m.total_distractions(), 0);
    }

    #[test]
    fn test_sustained_distraction_emits_once() {
        let mut m = machine();
        let mut events = Vec::new();
        for i in 0..150 {
            let out = m.update(at(i), Some(HeadPose::new(30.0, 0.0, 5.0)), HandZones::default());
            if let Some(event) = out.event {
                events.push((i, event));
            }
            if i > 100 {
                assert!(out.distracted);
            }
        }
        assert_eq!(events.len(), 1);
        let (frame, event) = events[0];
        // Stable from frame 2 (3 votes), confirmed once 2.5 s have passed
        assert_eq!(frame, 65);
        assert_eq!(event.reason, DistractionReason::Down);
        assert_eq!(event.value, 30.0);
        assert_eq!(m.total_distractions(), 1);
        assert!(m.status().is_distracted);
    }

    #[test]
    fn test_invalid_pose_votes_false() {
        let mut m = machine();
        for i in 0..10 {
            let pose = if i % 2 == 0 {
                Some(HeadPose::new(0.0, 0.0, 0.0))
            } else {
                Some(HeadPose::new(0.0, 95.0, 0.0))
            };
            let out = m.update(at(i), pose, HandZones::default());
            assert!(!out.looking_away);
        }
        assert!(m.status().deltas.is_none());
    }

    #[test]
    fn test_reason_priority() {
        let m = machine();
        let zones = HandZoneConfig::default();
        let deltas = HeadPose::new(30.0, 50.0, 40.0);

        let phone = HandZones::classify(Some(&[hand((0.9, 0.5), (0.9, 0.2))]), &zones);
        assert_eq!(m.classify(&deltas, &phone).unwrap().0, DistractionReason::Phone);

        let both = HandZones::classify(
            Some(&[hand((0.4, 0.4), (0.4, 0.3)), hand((0.6, 0.4), (0.6, 0.3))]),
            &zones,
        );
        assert_eq!(m.classify(&deltas, &both).unwrap().0, DistractionReason::BothHands);

        let one = HandZones::classify(
            Some(&[hand((0.4, 0.8), (0.4, 0.7)), hand((0.6, 0.4), (0.6, 0.3))]),
            &zones,
        );
        assert_eq!(m.classify(&deltas, &one).unwrap().0, DistractionReason::OneHand);

        let none = HandZones::default();
        assert_eq!(m.classify(&deltas, &none).unwrap().0, DistractionReason::Aside);
        assert_eq!(
            m.classify(&HeadPose::new(-30.0, 0.0, 0.0), &none).unwrap().0,
            DistractionReason::Up
        );
        assert_eq!(
            m.classify(&HeadPose::new(0.0, 0.0, 40.0), &none).unwrap().0,
            DistractionReason::Roll
        );
        assert!(m.classify(&HeadPose::new(10.0, 10.0, 10.0), &none).is_none());
        // Hands off the wheel alone do not vote
        assert!(m.classify(&HeadPose::new(10.0, 10.0, 10.0), &both).is_none());
        assert!(m.classify(&HeadPose::new(10.0, 10.0, 10.0), &one).is_none());
    }

    #[test]
    fn test_phone_held_confirms_once() {
        let mut m = machine();
        let zones = HandZoneConfig::default();
        let phone = HandZones::classify(Some(&[hand((0.9, 0.5), (0.9, 0.2))]), &zones);
        assert!(phone.phone);

        let mut events = Vec::new();
        for i in 0..100 {
            let out = m.update(at(i), forward(), phone);
            if i >= 2 {
                assert_eq!(out.reason, Some(DistractionReason::Phone));
            }
            if let Some(event) = out.event {
                events.push((i, event));
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 65);
        assert_eq!(events[0].1.reason, DistractionReason::Phone);
        assert!(m.status().holding_phone);
    }

    #[test]
    fn test_raised_hand_with_forward_pose_never_confirms() {
        let mut m = machine();
        let zones = HandZoneConfig::default();
        let raised = HandZones::classify(Some(&[hand((0.6, 0.4), (0.6, 0.3))]), &zones);
        assert!(!raised.phone);
        assert_eq!(raised.off_wheel(), 1);

        for i in 0..100 {
            let out = m.update(at(i), forward(), raised);
            assert!(!out.looking_away);
            assert!(!out.distracted);
            assert!(out.event.is_none());
        }
        assert_eq!(m.total_distractions(), 0);
    }

    #[test]
    fn test_raised_hand_upgrades_pose_reason() {
        let mut m = machine();
        let zones = HandZoneConfig::default();
        let raised = HandZones::classify(Some(&[hand((0.6, 0.4), (0.6, 0.3))]), &zones);

        let mut events = Vec::new();
        for i in 0..100 {
            if let Some(event) = m.update(at(i), Some(HeadPose::new(30.0, 0.0, 5.0)), raised).event {
                events.push(event);
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, DistractionReason::OneHand);
    }

    #[test]
    fn test_camera_offset_shifts_baseline() {
        let mut m = machine();
        m.adjust_camera_offset(Some(20.0), None);
        // 30 degrees down is only 10 past the new baseline
        for i in 0..10 {
            let out = m.update(at(i), Some(HeadPose::new(30.0, 0.0, 1.0)), HandZones::default());
            assert!(!out.looking_away);
        }
        assert_eq!(m.expected_pose().pitch, 20.0);
    }

    #[test]
    fn test_recovery_resets_timer() {
        let mut m = machine();
        for i in 0..100 {
            m.update(at(i), Some(HeadPose::new(0.0, 60.0, 0.0)), HandZones::default());
        }
        assert!(m.status().is_distracted);
        for i in 100..105 {
            m.update(at(i), forward(), HandZones::default());
        }
        let status = m.status();
        assert!(!status.is_distracted);
        assert_eq!(status.duration_sec, 0.0);

        // A new sustained episode is counted again
        for i in 105..200 {
            m.update(at(i), Some(HeadPose::new(0.0, 60.0, 0.0)), HandZones::default());
        }
        assert_eq!(m.total_distractions(), 2);
    }
}
