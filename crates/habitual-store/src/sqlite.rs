//! SQLite adapter for the reminder store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

use crate::{
    Challenge, ChallengeDetails, ChallengeKind, ReminderRow, ReminderStore, StoreError, User,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT,
        fcm_token TEXT,
        timezone TEXT NOT NULL DEFAULT 'UTC',
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_users_timezone ON users(timezone);

    CREATE TABLE IF NOT EXISTS challenges (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT REFERENCES users(id) ON DELETE CASCADE,
        challenge_type TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        enable_reminders INTEGER,
        reminder_times TEXT,
        habit TEXT,
        goal TEXT,
        theme TEXT,
        custom_theme TEXT,
        habit_to_quit TEXT,
        custom_habit TEXT,
        main_motivation TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_challenges_active
        ON challenges(completed, enable_reminders);
";

const USER_COLUMNS: &str = "id, email, fcm_token, timezone";

/// SQLite-backed reminder store.
///
/// Queries run on the blocking pool; the connection is shared behind a mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// A challenge row before its kind-specific fields are interpreted.
struct RawChallenge {
    id: String,
    user_id: String,
    challenge_type: String,
    completed: bool,
    reminders_enabled: bool,
    reminder_times: Option<String>,
    habit: Option<String>,
    goal: Option<String>,
    theme: Option<String>,
    custom_theme: Option<String>,
    habit_to_quit: Option<String>,
    custom_habit: Option<String>,
    main_motivation: Option<String>,
}

impl SqliteStore {
    /// Open or create the SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::init(conn)?;
        info!(path = %path, "reminder database initialized");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a user.
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, fcm_token, timezone) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                fcm_token = excluded.fcm_token,
                timezone = excluded.timezone",
            params![user.id, user.email, user.fcm_token, user.timezone],
        )?;
        Ok(())
    }

    /// Insert or replace a challenge.
    pub fn insert_challenge(&self, challenge: &Challenge) -> Result<(), StoreError> {
        let reminder_times = serde_json::to_string(&challenge.reminder_times)?;
        let (habit, goal, theme, custom_theme, habit_to_quit, custom_habit, main_motivation) =
            match &challenge.details {
                ChallengeDetails::Ninety { habit, goal } => {
                    (habit, goal, &None, &None, &None, &None, &None)
                }
                ChallengeDetails::Thirty {
                    theme,
                    custom_theme,
                } => (&None, &None, theme, custom_theme, &None, &None, &None),
                ChallengeDetails::Replacement {
                    habit_to_quit,
                    custom_habit,
                    main_motivation,
                } => (
                    &None,
                    &None,
                    &None,
                    &None,
                    habit_to_quit,
                    custom_habit,
                    main_motivation,
                ),
            };

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO challenges
             (id, user_id, challenge_type, completed, enable_reminders, reminder_times,
              habit, goal, theme, custom_theme, habit_to_quit, custom_habit, main_motivation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                challenge.id,
                challenge.user_id,
                challenge.kind().as_str(),
                challenge.completed,
                challenge.reminders_enabled,
                reminder_times,
                habit,
                goal,
                theme,
                custom_theme,
                habit_to_quit,
                custom_habit,
                main_motivation,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the raw `reminder_times` column, bypassing JSON encoding.
    pub fn set_raw_reminder_times(
        &self,
        challenge_id: &str,
        raw: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE challenges SET reminder_times = ?1 WHERE id = ?2",
            params![raw, challenge_id],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("query task failed: {}", e)))?
    }
}

#[async_trait]
impl ReminderStore for SqliteStore {
    async fn users_in_timezone(&self, timezone: &str) -> Result<Vec<User>, StoreError> {
        let timezone = timezone.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE timezone = ?1 ORDER BY id",
                USER_COLUMNS
            ))?;
            let users = stmt
                .query_map(params![timezone], |row| user_from_row(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    async fn active_reminders(&self) -> Result<Vec<ReminderRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.fcm_token, u.timezone,
                        c.id, c.user_id, c.challenge_type, c.completed, c.enable_reminders,
                        c.reminder_times, c.habit, c.goal, c.theme, c.custom_theme,
                        c.habit_to_quit, c.custom_habit, c.main_motivation
                 FROM challenges c
                 JOIN users u ON u.id = c.user_id
                 WHERE c.completed = 0 AND c.enable_reminders = 1
                 ORDER BY c.created_at, c.id",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    let user = user_from_row(row, 0)?;
                    let raw = RawChallenge {
                        id: row.get(4)?,
                        user_id: row.get(5)?,
                        challenge_type: row.get(6)?,
                        completed: row.get(7)?,
                        reminders_enabled: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
                        reminder_times: row.get(9)?,
                        habit: row.get(10)?,
                        goal: row.get(11)?,
                        theme: row.get(12)?,
                        custom_theme: row.get(13)?,
                        habit_to_quit: row.get(14)?,
                        custom_habit: row.get(15)?,
                        main_motivation: row.get(16)?,
                    };
                    Ok((user, raw))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut reminders = Vec::with_capacity(rows.len());
            for (user, raw) in rows {
                match raw.into_challenge() {
                    Ok(challenge) => reminders.push(ReminderRow { challenge, user }),
                    Err(e) => warn!(error = %e, "skipping unreadable challenge row"),
                }
            }
            Ok(reminders)
        })
        .await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                    params![id],
                    |row| user_from_row(row, 0),
                )
                .optional()?;
            Ok(user)
        })
        .await
    }
}

fn user_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        email: row.get(offset + 1)?,
        fcm_token: row.get(offset + 2)?,
        timezone: row.get(offset + 3)?,
    })
}

impl RawChallenge {
    fn into_challenge(self) -> Result<Challenge, StoreError> {
        let kind: ChallengeKind = self.challenge_type.parse().map_err(|e: String| {
            StoreError::InvalidRow(format!("challenge {}: {}", self.id, e))
        })?;

        let details = match kind {
            ChallengeKind::Ninety => ChallengeDetails::Ninety {
                habit: self.habit,
                goal: self.goal,
            },
            ChallengeKind::Thirty => ChallengeDetails::Thirty {
                theme: self.theme,
                custom_theme: self.custom_theme,
            },
            ChallengeKind::Replacement => ChallengeDetails::Replacement {
                habit_to_quit: self.habit_to_quit,
                custom_habit: self.custom_habit,
                main_motivation: self.main_motivation,
            },
        };

        Ok(Challenge {
            id: self.id,
            user_id: self.user_id,
            completed: self.completed,
            reminders_enabled: self.reminders_enabled,
            reminder_times: decode_reminder_times(self.reminder_times.as_deref()),
            details,
        })
    }
}

/// Decode the `reminder_times` column.
///
/// A JSON array yields its entries; anything else that is not blank is kept
/// as a single raw label. Labels are interpreted later, leniently.
pub(crate) fn decode_reminder_times(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Ok(serde_json::Value::Null) => Vec::new(),
        Ok(serde_json::Value::String(s)) => vec![s],
        Ok(other) => vec![other.to_string()],
        Err(_) => vec![raw.to_string()],
    }
}
