//! The set of IANA zones the dispatch jobs iterate over.

use crate::SchedulerError;

/// IANA timezone name, e.g. `America/New_York`.
pub type TimezoneId = String;

/// Immutable list of timezone identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneCatalog {
    zones: Vec<TimezoneId>,
}

impl TimezoneCatalog {
    /// Every zone compiled into the bundled tz database.
    pub fn builtin() -> Self {
        let zones = chrono_tz::TZ_VARIANTS
            .iter()
            .map(|tz| tz.name().to_string())
            .collect();
        Self { zones }
    }

    /// Explicit list of zones. Entries are not validated here; zones the
    /// database does not know are skipped when bucketing.
    pub fn from_ids<I, S>(ids: I) -> Result<Self, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut zones: Vec<TimezoneId> = Vec::new();
        for id in ids {
            let id: String = id.into();
            let id = id.trim();
            if !id.is_empty() && !zones.iter().any(|z| z == id) {
                zones.push(id.to_string());
            }
        }

        if zones.is_empty() {
            return Err(SchedulerError::EmptyCatalog);
        }
        Ok(Self { zones })
    }

    pub fn list_all(&self) -> &[TimezoneId] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.zones.iter().any(|z| z == id)
    }
}
