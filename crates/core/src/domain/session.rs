use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::flows::FlowState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    City,
    Language,
}

impl FilterKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::City => "city",
            Self::Language => "language",
        }
    }
}

/// A single search constraint. Values are stored in display case so that
/// "jaipur", "JAIPUR" and "Jaipur" accumulate into the same filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub key: FilterKey,
    pub value: String,
}

impl Filter {
    pub fn new(key: FilterKey, value: &str) -> Option<Self> {
        let value = display_case(value);
        if value.is_empty() {
            return None;
        }
        Some(Self { key, value })
    }

    pub fn city(value: &str) -> Option<Self> {
        Self::new(FilterKey::City, value)
    }

    pub fn language(value: &str) -> Option<Self> {
        Self::new(FilterKey::Language, value)
    }
}

pub fn display_case(value: &str) -> String {
    value
        .split(|c: char| c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    pub city: Option<String>,
    pub language: Option<String>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.language.is_none()
    }

    pub fn len(&self) -> usize {
        usize::from(self.city.is_some()) + usize::from(self.language.is_some())
    }

    pub fn has_city(&self) -> bool {
        self.city.is_some()
    }

    pub fn get(&self, key: FilterKey) -> Option<&str> {
        match key {
            FilterKey::City => self.city.as_deref(),
            FilterKey::Language => self.language.as_deref(),
        }
    }

    /// Sets one filter, returning whether the stored value changed.
    pub fn set(&mut self, filter: Filter) -> bool {
        let slot = match filter.key {
            FilterKey::City => &mut self.city,
            FilterKey::Language => &mut self.language,
        };
        if slot.as_deref() == Some(filter.value.as_str()) {
            return false;
        }
        *slot = Some(filter.value);
        true
    }

    /// Later filters override earlier ones with the same key.
    pub fn merge<I>(&mut self, filters: I) -> bool
    where
        I: IntoIterator<Item = Filter>,
    {
        filters.into_iter().fold(false, |changed, filter| self.set(filter) || changed)
    }

    /// Drops one filter, returning whether it was set.
    pub fn remove(&mut self, key: FilterKey) -> bool {
        match key {
            FilterKey::City => self.city.take().is_some(),
            FilterKey::Language => self.language.take().is_some(),
        }
    }

    pub fn clear(&mut self) {
        self.city = None;
        self.language = None;
    }

    pub fn to_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::with_capacity(self.len());
        if let Some(city) = &self.city {
            filters.push(Filter { key: FilterKey::City, value: city.clone() });
        }
        if let Some(language) = &self.language {
            filters.push(Filter { key: FilterKey::Language, value: language.clone() });
        }
        filters
    }

    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "no filters".to_owned();
        }
        self.to_filters()
            .iter()
            .map(|filter| format!("{}: {}", filter.key.as_str(), filter.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Query,
    Reset,
    Unknown,
}

impl SessionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Reset => "reset",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub filters: FilterSet,
    pub last_action: Option<SessionAction>,
    pub turn_count: u64,
    pub state: FlowState,
    pub page: u32,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            filters: FilterSet::default(),
            last_action: None,
            turn_count: 0,
            state: FlowState::Idle,
            page: 1,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Checks the invariants that must hold between turns.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self.state {
            FlowState::AwaitingResult => Err(DomainError::InvariantViolation(format!(
                "session `{}` is still awaiting a lookup result",
                self.user_id
            ))),
            FlowState::Idle if !self.filters.is_empty() => {
                Err(DomainError::InvariantViolation(format!(
                    "idle session `{}` carries filters ({})",
                    self.user_id,
                    self.filters.describe()
                )))
            }
            FlowState::Collecting if self.filters.is_empty() => Err(
                DomainError::InvariantViolation(format!(
                    "collecting session `{}` has no filters",
                    self.user_id
                )),
            ),
            _ if self.page == 0 => Err(DomainError::InvariantViolation(format!(
                "session `{}` has page 0",
                self.user_id
            ))),
            _ => Ok(()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now.signed_duration_since(self.last_active_at)
            .to_std()
            .map(|elapsed| elapsed >= idle_timeout)
            .unwrap_or(false)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
    }

    /// Returns the session to the empty-filter Idle state; history counters are kept.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.filters.clear();
        self.state = FlowState::Idle;
        self.page = 1;
        self.last_action = Some(SessionAction::Reset);
        self.last_active_at = now;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::domain::session::{
        display_case, Filter, FilterKey, FilterSet, Session, SessionAction, UserId,
    };
    use crate::errors::DomainError;
    use crate::flows::FlowState;

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn filter_values_are_stored_in_display_case() {
        assert_eq!(display_case("  new   delhi "), "New Delhi");
        assert_eq!(display_case("HINDI"), "Hindi");
        assert_eq!(Filter::city("   "), None);
        assert_eq!(Filter::language("tamil").map(|filter| filter.value), Some("Tamil".to_owned()));
    }

    #[test]
    fn merge_overrides_same_key_and_keeps_others() {
        let mut filters = FilterSet::default();
        assert!(filters.merge(Filter::city("jaipur")));
        assert!(filters.merge(Filter::language("hindi")));
        assert!(filters.merge(Filter::city("pune")));

        assert_eq!(filters.get(FilterKey::City), Some("Pune"));
        assert_eq!(filters.get(FilterKey::Language), Some("Hindi"));
        assert_eq!(filters.len(), 2);
        assert_eq!(filters.describe(), "city: Pune, language: Hindi");
    }

    #[test]
    fn merging_identical_value_reports_no_change() {
        let mut filters = FilterSet::default();
        filters.merge(Filter::city("Jaipur"));
        assert!(!filters.merge(Filter::city("JAIPUR")));
    }

    #[test]
    fn removing_one_filter_keeps_the_other() {
        let mut filters = FilterSet::default();
        filters.merge(Filter::city("Jaipur"));
        filters.merge(Filter::language("Hindi"));

        assert!(filters.remove(FilterKey::Language));
        assert!(!filters.remove(FilterKey::Language));
        assert_eq!(filters.describe(), "city: Jaipur");
    }

    #[test]
    fn reset_returns_to_idle_and_keeps_turn_count() {
        let mut session = Session::new(UserId::new("U1"), at(0));
        session.filters.merge(Filter::city("Jaipur"));
        session.state = FlowState::Collecting;
        session.page = 3;
        session.turn_count = 4;

        session.reset(at(10));

        assert!(session.filters.is_empty());
        assert_eq!(session.state, FlowState::Idle);
        assert_eq!(session.page, 1);
        assert_eq!(session.turn_count, 4);
        assert_eq!(session.last_action, Some(SessionAction::Reset));
        assert!(session.validate().is_ok());
    }

    #[test]
    fn validate_flags_inconsistent_sessions() {
        let mut session = Session::new(UserId::new("U1"), at(0));
        session.state = FlowState::AwaitingResult;
        assert!(matches!(session.validate(), Err(DomainError::InvariantViolation(_))));

        session.state = FlowState::Idle;
        session.filters.merge(Filter::city("Jaipur"));
        assert!(session.validate().is_err());

        session.state = FlowState::Collecting;
        assert!(session.validate().is_ok());

        session.page = 0;
        assert!(session.validate().is_err());
    }

    #[test]
    fn expiry_uses_last_activity() {
        let mut session = Session::new(UserId::new("U1"), at(0));
        session.touch(at(100));
        assert!(!session.is_expired(at(150), Duration::from_secs(60)));
        assert!(session.is_expired(at(160), Duration::from_secs(60)));
        assert!(!session.is_expired(at(50), Duration::from_secs(1)));
    }
}
