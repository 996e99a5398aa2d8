//! Per-challenge reminder evaluation.

use chrono::{DateTime, Timelike, Utc};
use tracing::warn;

use habitual_store::{Challenge, User};

use crate::clock::local_time_in;

/// Named reminder slots and the local hour each fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Interpret a stored label. Case and surrounding whitespace are ignored;
    /// anything unrecognized is treated as morning.
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "afternoon" => TimeOfDay::Afternoon,
            "evening" => TimeOfDay::Evening,
            "night" => TimeOfDay::Night,
            _ => TimeOfDay::Morning,
        }
    }

    pub fn hour(self) -> u32 {
        match self {
            TimeOfDay::Morning => 8,
            TimeOfDay::Afternoon => 13,
            TimeOfDay::Evening => 18,
            TimeOfDay::Night => 21,
        }
    }
}

/// Local hour a reminder label fires at.
pub fn canonical_hour(label: &str) -> u32 {
    TimeOfDay::parse_lenient(label).hour()
}

/// The first of the challenge's labels due in the owner's current local hour.
pub fn due_label<'a>(challenge: &'a Challenge, user: &User, now: DateTime<Utc>) -> Option<&'a str> {
    if challenge.reminder_times.is_empty() {
        return None;
    }

    let local = match local_time_in(&user.timezone, now) {
        Ok(local) => local,
        Err(e) => {
            warn!(
                user = %user.id,
                challenge = %challenge.id,
                error = %e,
                "cannot evaluate reminder"
            );
            return None;
        }
    };

    challenge
        .reminder_times
        .iter()
        .map(String::as_str)
        .find(|label| canonical_hour(label) == local.hour())
}

/// Whether any of the challenge's reminders falls in the owner's current local hour.
pub fn is_due_now(challenge: &Challenge, user: &User, now: DateTime<Utc>) -> bool {
    due_label(challenge, user, now).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use habitual_store::ChallengeDetails;
    use test_case::test_case;

    fn challenge(times: &[&str]) -> Challenge {
        Challenge {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            completed: false,
            reminders_enabled: true,
            reminder_times: times.iter().map(|t| t.to_string()).collect(),
            details: ChallengeDetails::Ninety {
                habit: Some("running".to_string()),
                goal: None,
            },
        }
    }

    #[test_case("morning", 8)]
    #[test_case("Afternoon", 13)]
    #[test_case("  EVENING ", 18)]
    #[test_case("night", 21)]
    #[test_case("midnight", 8 ; "unknown label")]
    #[test_case("", 8 ; "empty label")]
    #[test_case("nite", 8 ; "misspelled")]
    fn test_canonical_hour(label: &str, hour: u32) {
        assert_eq!(canonical_hour(label), hour);
    }

    #[test]
    fn test_due_in_users_zone() {
        let user = User::new("u1").with_timezone("America/New_York");
        let c = challenge(&["morning", "night"]);

        // 02:00 UTC on Jan 16 is 21:00 EST on Jan 15
        let now = Utc.with_ymd_and_hms(2026, 1, 16, 2, 0, 0).unwrap();
        assert_eq!(due_label(&c, &user, now), Some("night"));

        let now = Utc.with_ymd_and_hms(2026, 1, 16, 3, 0, 0).unwrap();
        assert!(!is_due_now(&c, &user, now));
    }

    #[test]
    fn test_whole_hour_matches() {
        let user = User::new("u1");
        let c = challenge(&["evening"]);
        let now = Utc.with_ymd_and_hms(2026, 1, 16, 18, 42, 0).unwrap();
        assert!(is_due_now(&c, &user, now));
    }

    #[test]
    fn test_first_matching_label_wins() {
        let user = User::new("u1");
        let c = challenge(&["afternoon", "Morning", "bogus"]);
        let now = Utc.with_ymd_and_hms(2026, 1, 16, 8, 0, 0).unwrap();
        assert_eq!(due_label(&c, &user, now), Some("Morning"));
    }

    #[test]
    fn test_empty_times_never_due() {
        let user = User::new("u1");
        let c = challenge(&[]);
        let now = Utc.with_ymd_and_hms(2026, 1, 16, 8, 0, 0).unwrap();
        assert!(!is_due_now(&c, &user, now));
    }

    #[test]
    fn test_unknown_timezone_never_due() {
        let user = User::new("u1").with_timezone("Nowhere/Special");
        let c = challenge(&["morning"]);
        let now = Utc.with_ymd_and_hms(2026, 1, 16, 8, 0, 0).unwrap();
        assert!(!is_due_now(&c, &user, now));
    }
}
