//! Entity views read by the reminder engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Timezone stored for users that never set one.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// A user as seen by the reminder engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier (issued by the auth provider).
    pub id: String,
    /// Contact address, if known.
    pub email: Option<String>,
    /// Registered device token for push delivery.
    pub fcm_token: Option<String>,
    /// IANA timezone identifier.
    pub timezone: String,
}

impl User {
    /// Create a user in the default timezone with no device token.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            fcm_token: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.fcm_token = Some(token.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// The device token, treating an empty string as absent.
    pub fn device_token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// The supported habit programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// 90-day habit building challenge.
    Ninety,
    /// 30-day themed challenge.
    Thirty,
    /// Replace a bad habit with a new one.
    Replacement,
}

impl ChallengeKind {
    /// Every kind, in a fixed order.
    pub const ALL: [ChallengeKind; 3] = [
        ChallengeKind::Ninety,
        ChallengeKind::Thirty,
        ChallengeKind::Replacement,
    ];

    /// Wire name, as stored in the `challenge_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Ninety => "ninety",
            ChallengeKind::Thirty => "thirty",
            ChallengeKind::Replacement => "replacement",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ninety" => Ok(ChallengeKind::Ninety),
            "thirty" => Ok(ChallengeKind::Thirty),
            "replacement" => Ok(ChallengeKind::Replacement),
            other => Err(format!("unknown challenge kind '{}'", other)),
        }
    }
}

/// Kind-specific display fields of a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChallengeDetails {
    Ninety {
        habit: Option<String>,
        goal: Option<String>,
    },
    Thirty {
        theme: Option<String>,
        custom_theme: Option<String>,
    },
    Replacement {
        habit_to_quit: Option<String>,
        custom_habit: Option<String>,
        main_motivation: Option<String>,
    },
}

impl ChallengeDetails {
    pub fn kind(&self) -> ChallengeKind {
        match self {
            ChallengeDetails::Ninety { .. } => ChallengeKind::Ninety,
            ChallengeDetails::Thirty { .. } => ChallengeKind::Thirty,
            ChallengeDetails::Replacement { .. } => ChallengeKind::Replacement,
        }
    }
}

/// A challenge as seen by the reminder engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Challenge identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Whether the challenge has been finished.
    pub completed: bool,
    /// Whether the owner opted into reminders.
    pub reminders_enabled: bool,
    /// Free-form time-of-day labels ("morning", "evening", ...), in stored order.
    pub reminder_times: Vec<String>,
    /// Kind-specific fields.
    pub details: ChallengeDetails,
}

impl Challenge {
    pub fn kind(&self) -> ChallengeKind {
        self.details.kind()
    }
}

/// One row of the active reminders query: a challenge joined to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRow {
    pub challenge: Challenge,
    pub user: User,
}
