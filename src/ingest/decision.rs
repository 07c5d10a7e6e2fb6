//! Per-reading state-transition rules.
//!
//! Everything here is pure: the caller loads the sensor (with its owner's
//! preferences), resolves the door bit for the sensor's channel, and applies
//! the returned [`Decision`] to the store and the notifier.

use chrono::{DateTime, Duration, Utc};

use crate::db::models::SensorWithOwner;

/// A door left open longer than this re-triggers the door notification.
/// The window slides: the anchor resets each time a notification fires.
pub const DOOR_REALERT_MS: i64 = 120_000;

// ---------------------------------------------------------------------------
// AlertKind
// ---------------------------------------------------------------------------

/// Threshold classification of a reading against the configured band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// `temperature > max_threshold`
    High,
    /// `temperature < min_threshold`
    Low,
}

impl AlertKind {
    /// Label used in the WhatsApp alert message.
    pub fn label(self) -> &'static str {
        match self {
            AlertKind::High => "ALTA",
            AlertKind::Low => "BAJA",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            AlertKind::High => "🔥",
            AlertKind::Low => "❄️",
        }
    }
}

/// Classify a temperature against the band. Strict comparisons: a reading
/// exactly at a bound is in range. With inverted bounds (`min > max`) both
/// tests match and Low wins.
pub fn classify(temperature: f64, min: f64, max: f64) -> Option<AlertKind> {
    if temperature < min {
        Some(AlertKind::Low)
    } else if temperature > max {
        Some(AlertKind::High)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// DoorAction
// ---------------------------------------------------------------------------

/// What the door-state machine does with this reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorAction {
    /// No door channel applies to this sensor; door fields stay untouched.
    None,
    /// Closed → open: set `is_door_open`, anchor `door_opened_at` at now.
    Opened,
    /// Open → still open within the window: leave `door_opened_at` alone.
    StillOpen,
    /// Open past the window with notifications enabled: dispatch the door
    /// alert and re-anchor `door_opened_at` at now.
    ReAlert,
    /// Reported closed: clear `is_door_open` and `door_opened_at`.
    Closed,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The complete outcome of evaluating one reading: what to do with the door
/// state, whether to clear the acknowledgement, and which threshold alert
/// (if any) to attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub door: DoorAction,
    pub clear_ack: bool,
    pub alert: Option<AlertKind>,
}

/// True once the cooldown window has fully elapsed since the last dispatch.
pub fn cooldown_elapsed(
    last_alert_sent: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    match last_alert_sent {
        None => true,
        Some(last) => now - last > window,
    }
}

/// Evaluate one reading for one sensor.
///
/// `door_bit` is the payload value for the sensor's configured channel, or
/// `None` when the sensor has no mapped door channel — in which case the
/// door state machine never runs, even if the payload carried door fields.
///
/// The threshold alert here is an *attempt*: the caller still gates the
/// dispatch on an atomic conditional update of `last_alert_sent`, so two
/// concurrent readings cannot both win the cooldown.
pub fn evaluate(
    sensor: &SensorWithOwner,
    door_bit: Option<bool>,
    temperature: f64,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Decision {
    let door = match door_bit {
        None => DoorAction::None,
        Some(false) => DoorAction::Closed,
        Some(true) => {
            if !sensor.is_door_open {
                DoorAction::Opened
            } else {
                let anchor = sensor.door_opened_at.unwrap_or(now);
                let over_window = now - anchor > Duration::milliseconds(DOOR_REALERT_MS);
                if over_window && sensor.whatsapp_alerts && sensor.use_door_sensors {
                    DoorAction::ReAlert
                } else {
                    DoorAction::StillOpen
                }
            }
        }
    };

    let in_range =
        temperature >= sensor.min_threshold && temperature <= sensor.max_threshold;
    let clear_ack = in_range && sensor.is_acknowledged;

    let alert = classify(temperature, sensor.min_threshold, sensor.max_threshold)
        .filter(|_| !sensor.is_acknowledged)
        .filter(|_| sensor.whatsapp_alerts)
        .filter(|_| cooldown_elapsed(sensor.last_alert_sent, now, cooldown));

    Decision { door, clear_ack, alert }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    fn cooldown() -> Duration {
        Duration::minutes(30)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sensor() -> SensorWithOwner {
        SensorWithOwner {
            hardware_id: "ESP32-A1".to_owned(),
            friendly_name: "Heladera 1".to_owned(),
            min_threshold: 0.0,
            max_threshold: 10.0,
            door_pin: Some(4),
            is_door_open: false,
            door_opened_at: None,
            is_acknowledged: false,
            last_alert_sent: None,
            owner_id: Uuid::new_v4(),
            whatsapp: "5491122334455".to_owned(),
            whatsapp_alerts: true,
            use_door_sensors: true,
        }
    }

    // -----------------------------------------------------------------------
    // Threshold classification
    // -----------------------------------------------------------------------

    #[test]
    fn classify_strictly_above_max_is_high() {
        assert_eq!(classify(12.0, 0.0, 10.0), Some(AlertKind::High));
    }

    #[test]
    fn classify_strictly_below_min_is_low() {
        assert_eq!(classify(-1.5, 0.0, 10.0), Some(AlertKind::Low));
    }

    #[test]
    fn classify_at_bounds_is_in_range() {
        assert_eq!(classify(10.0, 0.0, 10.0), None);
        assert_eq!(classify(0.0, 0.0, 10.0), None);
    }

    #[test]
    fn classify_inverted_bounds_low_wins() {
        // min > max: both comparisons match, Low takes precedence.
        assert_eq!(classify(5.0, 8.0, 2.0), Some(AlertKind::Low));
    }

    #[test]
    fn alert_kind_labels() {
        assert_eq!(AlertKind::High.label(), "ALTA");
        assert_eq!(AlertKind::Low.label(), "BAJA");
    }

    // -----------------------------------------------------------------------
    // Threshold alert gating
    // -----------------------------------------------------------------------

    #[test]
    fn first_out_of_range_reading_alerts() {
        let d = evaluate(&sensor(), None, 12.0, at(0), cooldown());
        assert_eq!(d.alert, Some(AlertKind::High));
        assert!(!d.clear_ack);
    }

    #[test]
    fn within_cooldown_no_second_alert() {
        let mut s = sensor();
        s.last_alert_sent = Some(at(0));
        // 5 minutes later, still out of range
        let d = evaluate(&s, None, 13.0, at(300), cooldown());
        assert_eq!(d.alert, None);
    }

    #[test]
    fn after_cooldown_alert_fires_again() {
        let mut s = sensor();
        s.last_alert_sent = Some(at(0));
        let d = evaluate(&s, None, 13.0, at(31 * 60), cooldown());
        assert_eq!(d.alert, Some(AlertKind::High));
    }

    #[test]
    fn cooldown_boundary_is_strict() {
        let mut s = sensor();
        s.last_alert_sent = Some(at(0));
        // Exactly 30 minutes: not yet eligible.
        let d = evaluate(&s, None, 13.0, at(30 * 60), cooldown());
        assert_eq!(d.alert, None);
    }

    #[test]
    fn acknowledged_sensor_never_alerts() {
        let mut s = sensor();
        s.is_acknowledged = true;
        let d = evaluate(&s, None, 13.0, at(0), cooldown());
        assert_eq!(d.alert, None);
    }

    #[test]
    fn alerts_disabled_suppresses_dispatch() {
        let mut s = sensor();
        s.whatsapp_alerts = false;
        let d = evaluate(&s, None, 13.0, at(0), cooldown());
        assert_eq!(d.alert, None);
    }

    #[test]
    fn low_alert_below_min() {
        let mut s = sensor();
        s.min_threshold = 2.0;
        let d = evaluate(&s, None, 1.0, at(0), cooldown());
        assert_eq!(d.alert, Some(AlertKind::Low));
    }

    // -----------------------------------------------------------------------
    // Acknowledgement reset
    // -----------------------------------------------------------------------

    #[test]
    fn in_range_reading_clears_acknowledgement() {
        let mut s = sensor();
        s.is_acknowledged = true;
        let d = evaluate(&s, None, 5.0, at(0), cooldown());
        assert!(d.clear_ack);
        assert_eq!(d.alert, None);
    }

    #[test]
    fn in_range_at_bound_clears_acknowledgement() {
        let mut s = sensor();
        s.is_acknowledged = true;
        let d = evaluate(&s, None, 10.0, at(0), cooldown());
        assert!(d.clear_ack);
    }

    #[test]
    fn out_of_range_keeps_acknowledgement() {
        let mut s = sensor();
        s.is_acknowledged = true;
        let d = evaluate(&s, None, 12.0, at(0), cooldown());
        assert!(!d.clear_ack);
    }

    #[test]
    fn unacknowledged_in_range_is_noop() {
        let d = evaluate(&sensor(), None, 5.0, at(0), cooldown());
        assert!(!d.clear_ack);
    }

    // -----------------------------------------------------------------------
    // Door state machine
    // -----------------------------------------------------------------------

    #[test]
    fn no_channel_means_no_door_action() {
        // Door fields present in the payload don't matter without a mapping.
        let d = evaluate(&sensor(), None, 5.0, at(0), cooldown());
        assert_eq!(d.door, DoorAction::None);
    }

    #[test]
    fn closed_to_open_anchors_episode() {
        let d = evaluate(&sensor(), Some(true), 5.0, at(0), cooldown());
        assert_eq!(d.door, DoorAction::Opened);
    }

    #[test]
    fn still_open_within_window_keeps_anchor() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        // 2 minutes exactly: window not yet exceeded (strict).
        let d = evaluate(&s, Some(true), 5.0, at(120), cooldown());
        assert_eq!(d.door, DoorAction::StillOpen);
    }

    #[test]
    fn open_past_window_realerts() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        let d = evaluate(&s, Some(true), 5.0, at(150), cooldown());
        assert_eq!(d.door, DoorAction::ReAlert);
    }

    #[test]
    fn open_past_window_without_door_pref_stays_quiet() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        s.use_door_sensors = false;
        let d = evaluate(&s, Some(true), 5.0, at(150), cooldown());
        // No alert and, crucially, no anchor reset.
        assert_eq!(d.door, DoorAction::StillOpen);
    }

    #[test]
    fn open_past_window_without_whatsapp_pref_stays_quiet() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        s.whatsapp_alerts = false;
        let d = evaluate(&s, Some(true), 5.0, at(150), cooldown());
        assert_eq!(d.door, DoorAction::StillOpen);
    }

    #[test]
    fn open_with_missing_anchor_defaults_to_now() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = None;
        let d = evaluate(&s, Some(true), 5.0, at(500), cooldown());
        assert_eq!(d.door, DoorAction::StillOpen);
    }

    #[test]
    fn closed_report_resets_state() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        let d = evaluate(&s, Some(false), 5.0, at(60), cooldown());
        assert_eq!(d.door, DoorAction::Closed);
    }

    #[test]
    fn door_alert_independent_of_acknowledgement() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        s.is_acknowledged = true;
        let d = evaluate(&s, Some(true), 5.0, at(150), cooldown());
        assert_eq!(d.door, DoorAction::ReAlert);
        // Acknowledgement still suppresses the threshold alert.
        assert_eq!(d.alert, None);
    }

    #[test]
    fn threshold_and_door_alerts_can_coincide() {
        let mut s = sensor();
        s.is_door_open = true;
        s.door_opened_at = Some(at(0));
        let d = evaluate(&s, Some(true), 14.0, at(150), cooldown());
        assert_eq!(d.door, DoorAction::ReAlert);
        assert_eq!(d.alert, Some(AlertKind::High));
    }
}
