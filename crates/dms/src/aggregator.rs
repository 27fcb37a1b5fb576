//! Final status arbitration
//!
//! Priority: drowsiness class > confirmed distraction > NORMAL. The aggregator
//! only forwards the event produced by the machine that won; it never creates
//! events of its own.

use crate::analysis::{Diagnostics, FinalStatus, LoggableEvent};
use crate::distraction::DistractionOutput;
use crate::drowsiness::DrowsinessOutput;
use crate::state::{DistractionReason, StatusColor, StatusLabel};
use alerting::Severity;

/// Event category for distraction records
pub const DISTRACTION_CATEGORY: &str = "Distraction";

/// Color, alert detail and severity for a confirmed distraction
pub fn distraction_profile(reason: DistractionReason) -> (StatusColor, &'static str, Severity) {
    match reason {
        DistractionReason::Phone => (StatusColor::Red, "Phone In Hand", Severity::High),
        DistractionReason::BothHands => (StatusColor::Red, "Both Hands Off Wheel", Severity::High),
        DistractionReason::OneHand => (StatusColor::Orange, "One Hand Off Wheel", Severity::High),
        DistractionReason::Aside => (StatusColor::Yellow, "Looking Away from Road", Severity::Medium),
        DistractionReason::Down => (StatusColor::Yellow, "Looking Down at Device", Severity::Medium),
        DistractionReason::Up => (StatusColor::Yellow, "Looking Up Away from Road", Severity::Medium),
        DistractionReason::Roll => (StatusColor::Red, "Head Tilted", Severity::Medium),
    }
}

pub struct StatusAggregator;

impl StatusAggregator {
    pub fn aggregate(drowsiness: &DrowsinessOutput, distraction: &DistractionOutput) -> FinalStatus {
        let diagnostics = Diagnostics {
            looking_away: distraction.looking_away,
            ..drowsiness.diagnostics.clone()
        };

        if drowsiness.label.is_alerting() {
            return FinalStatus {
                label: StatusLabel::Drowsiness(drowsiness.label),
                color: drowsiness.color,
                diagnostics,
                event: drowsiness.event.clone(),
            };
        }

        if distraction.distracted {
            let reason = distraction.reason.unwrap_or(DistractionReason::Roll);
            let (color, _, _) = distraction_profile(reason);
            let event = distraction.event.map(|e| {
                let (_, detail, severity) = distraction_profile(e.reason);
                LoggableEvent {
                    event_type: format!("DISTRACTION_{}", e.reason.code()),
                    category: DISTRACTION_CATEGORY.to_string(),
                    detail: detail.to_string(),
                    severity,
                    duration_sec: e.duration_sec,
                    value: e.value,
                }
            });
            return FinalStatus {
                label: StatusLabel::Distracted(reason),
                color,
                diagnostics,
                event,
            };
        }

        FinalStatus {
            diagnostics,
            ..FinalStatus::normal()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distraction::DistractionEvent;
    use crate::state::DrowsinessLabel;
    use proptest::prelude::*;

    fn drowsiness(label: DrowsinessLabel, with_event: bool) -> DrowsinessOutput {
        DrowsinessOutput {
            label,
            color: StatusColor::Red,
            diagnostics: Diagnostics {
                drowsy_score: Some(0.7),
                ..Diagnostics::default()
            },
            event: with_event.then(|| LoggableEvent {
                event_type: "DROWSY".into(),
                category: "Drowsiness".into(),
                detail: "Eyes Closed Too Long".into(),
                severity: Severity::Medium,
                duration_sec: 1.0,
                value: 0.15,
            }),
        }
    }

    fn distraction(reason: DistractionReason, with_event: bool) -> DistractionOutput {
        DistractionOutput {
            looking_away: true,
            distracted: true,
            reason: Some(reason),
            duration_sec: 2.6,
            event: with_event.then_some(DistractionEvent {
                reason,
                duration_sec: 2.6,
                value: 50.0,
            }),
        }
    }

    #[test]
    fn test_drowsiness_wins() {
        let status = StatusAggregator::aggregate(
            &drowsiness(DrowsinessLabel::Drowsy, true),
            &distraction(DistractionReason::Aside, true),
        );
        assert_eq!(status.label, StatusLabel::Drowsiness(DrowsinessLabel::Drowsy));
        assert_eq!(status.event.unwrap().event_type, "DROWSY");
        assert_eq!(status.diagnostics.drowsy_score, Some(0.7));
        assert!(status.diagnostics.looking_away);
    }

    #[test]
    fn test_distraction_mapping() {
        let status = StatusAggregator::aggregate(
            &drowsiness(DrowsinessLabel::Normal, false),
            &distraction(DistractionReason::BothHands, true),
        );
        assert_eq!(status.label.to_string(), "BOTH HANDS VISIBLE!");
        assert_eq!(status.color, StatusColor::Red);
        let event = status.event.unwrap();
        assert_eq!(event.event_type, "DISTRACTION_BOTH_HANDS");
        assert_eq!(event.detail, "Both Hands Off Wheel");
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.category, DISTRACTION_CATEGORY);

        let status = StatusAggregator::aggregate(
            &drowsiness(DrowsinessLabel::Normal, false),
            &distraction(DistractionReason::Down, true),
        );
        assert_eq!(status.event.unwrap().severity, Severity::Medium);
    }

    #[test]
    fn test_sustained_distraction_has_no_event() {
        let status = StatusAggregator::aggregate(
            &drowsiness(DrowsinessLabel::Normal, false),
            &distraction(DistractionReason::Aside, false),
        );
        assert_eq!(status.label, StatusLabel::Distracted(DistractionReason::Aside));
        assert!(!status.should_log());
    }

    #[test]
    fn test_normal() {
        let status = StatusAggregator::aggregate(
            &drowsiness(DrowsinessLabel::Normal, false),
            &DistractionOutput::default(),
        );
        assert_eq!(status.label, StatusLabel::Normal);
        assert_eq!(status.color, StatusColor::Green);
        assert!(status.event.is_none());
    }

    fn any_drowsy_label() -> impl Strategy<Value = DrowsinessLabel> {
        prop_oneof![
            Just(DrowsinessLabel::Yawning),
            Just(DrowsinessLabel::FrequentYawning),
            Just(DrowsinessLabel::Drowsy),
        ]
    }

    fn any_reason() -> impl Strategy<Value = DistractionReason> {
        prop_oneof![
            Just(DistractionReason::Phone),
            Just(DistractionReason::BothHands),
            Just(DistractionReason::OneHand),
            Just(DistractionReason::Aside),
            Just(DistractionReason::Down),
            Just(DistractionReason::Up),
            Just(DistractionReason::Roll),
        ]
    }

    proptest! {
        #[test]
        fn test_drowsiness_class_always_wins(
            label in any_drowsy_label(),
            reason in any_reason(),
            drowsy_event in any::<bool>(),
            distraction_event in any::<bool>(),
        ) {
            let status = StatusAggregator::aggregate(
                &drowsiness(label, drowsy_event),
                &distraction(reason, distraction_event),
            );
            prop_assert!(status.label.is_drowsiness());
            prop_assert_eq!(status.event.is_some(), drowsy_event);
        }
    }
}
