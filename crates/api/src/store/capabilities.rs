//! Optional session columns a deployment may or may not have
//!
//! Older databases were created before some columns existed. The adapter
//! resolves the set once and drops entries when Postgres still reports
//! `42703 undefined_column`, so reads and writes degrade instead of failing.

/// Postgres SQLSTATE for `undefined_column`
pub const UNDEFINED_COLUMN: &str = "42703";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalColumn {
    RawAddress,
    IsBot,
    HumanValidated,
    Referrer,
    UserAgent,
}

/// Which column to give up when Postgres does not name one
pub const FALLBACK_ORDER: [OptionalColumn; 5] = [
    OptionalColumn::Referrer,
    OptionalColumn::UserAgent,
    OptionalColumn::HumanValidated,
    OptionalColumn::IsBot,
    OptionalColumn::RawAddress,
];

impl OptionalColumn {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawAddress => "raw_address",
            Self::IsBot => "is_bot",
            Self::HumanValidated => "human_validated",
            Self::Referrer => "referrer",
            Self::UserAgent => "user_agent",
        }
    }

    /// SQL type used when projecting a missing column as NULL
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::IsBot | Self::HumanValidated => "BOOLEAN",
            Self::RawAddress | Self::Referrer | Self::UserAgent => "TEXT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FALLBACK_ORDER.into_iter().find(|c| c.name() == name)
    }
}

/// Cached descriptor of the optional columns the store actually has
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub raw_address: bool,
    pub is_bot: bool,
    pub human_validated: bool,
    pub referrer: bool,
    pub user_agent: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self::full()
    }
}

impl StoreCapabilities {
    pub const fn full() -> Self {
        Self {
            raw_address: true,
            is_bot: true,
            human_validated: true,
            referrer: true,
            user_agent: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            raw_address: false,
            is_bot: false,
            human_validated: false,
            referrer: false,
            user_agent: false,
        }
    }

    /// Build from the column names listed by `information_schema.columns`
    pub fn from_columns<'a, I>(columns: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut caps = Self::none();
        for column in columns {
            if let Some(col) = OptionalColumn::from_name(column.trim()) {
                caps = caps.with(col, true);
            }
        }
        caps
    }

    pub fn has(&self, column: OptionalColumn) -> bool {
        match column {
            OptionalColumn::RawAddress => self.raw_address,
            OptionalColumn::IsBot => self.is_bot,
            OptionalColumn::HumanValidated => self.human_validated,
            OptionalColumn::Referrer => self.referrer,
            OptionalColumn::UserAgent => self.user_agent,
        }
    }

    fn with(mut self, column: OptionalColumn, present: bool) -> Self {
        match column {
            OptionalColumn::RawAddress => self.raw_address = present,
            OptionalColumn::IsBot => self.is_bot = present,
            OptionalColumn::HumanValidated => self.human_validated = present,
            OptionalColumn::Referrer => self.referrer = present,
            OptionalColumn::UserAgent => self.user_agent = present,
        }
        self
    }

    pub fn without(self, column: OptionalColumn) -> Self {
        self.with(column, false)
    }

    /// Columns present in both descriptors
    pub fn intersect(self, other: Self) -> Self {
        Self {
            raw_address: self.raw_address && other.raw_address,
            is_bot: self.is_bot && other.is_bot,
            human_validated: self.human_validated && other.human_validated,
            referrer: self.referrer && other.referrer,
            user_agent: self.user_agent && other.user_agent,
        }
    }

    /// Next descriptor after an undefined-column failure.
    ///
    /// A named column is dropped only when it is an optional column we still
    /// claim to have; any other name returns `None`. An unnamed failure drops the
    /// first remaining column in [`FALLBACK_ORDER`]. Returns `None` once there
    /// is nothing left to drop, which bounds every retry loop.
    pub fn degrade_for_error(&self, column: Option<&str>) -> Option<(Self, OptionalColumn)> {
        let victim = match column {
            Some(name) => OptionalColumn::from_name(name).filter(|c| self.has(*c))?,
            None => FALLBACK_ORDER.into_iter().find(|c| self.has(*c))?,
        };
        Some((self.without(victim), victim))
    }
}

/// Column name from a Postgres `undefined_column` message such as
/// `column "referrer" does not exist`, `column s.referrer does not exist` or,
/// for INSERT targets and UPDATE SET lists,
/// `column "referrer" of relation "analytics_sessions" does not exist`
pub fn undefined_column_name(message: &str) -> Option<String> {
    let rest = message.trim().strip_prefix("column ")?;
    let (ident, _) = rest.split_once(" does not exist")?;
    let ident = ident
        .split_once(" of relation ")
        .map_or(ident, |(column, _)| column);
    let ident = ident.trim().trim_matches('"');
    let ident = ident.rsplit('.').next().unwrap_or(ident).trim_matches('"');
    if ident.is_empty() {
        None
    } else {
        Some(ident.to_string())
    }
}

/// The missing column named by a sqlx error, if it is an undefined-column error.
///
/// Outer `None`: a different error. Inner `None`: undefined column but the
/// message did not name one.
pub fn undefined_column(err: &sqlx::Error) -> Option<Option<String>> {
    let db = err.as_database_error()?;
    if db.code().as_deref() != Some(UNDEFINED_COLUMN) {
        return None;
    }
    Some(undefined_column_name(db.message()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns() {
        let caps = StoreCapabilities::from_columns(["session_id", "referrer", "is_bot", "created_at"]);
        assert!(caps.referrer);
        assert!(caps.is_bot);
        assert!(!caps.raw_address);
        assert!(!caps.human_validated);
        assert!(!caps.user_agent);
    }

    #[test]
    fn test_degrade_prefers_named_column() {
        let (next, dropped) = StoreCapabilities::full()
            .degrade_for_error(Some("human_validated"))
            .unwrap();
        assert_eq!(dropped, OptionalColumn::HumanValidated);
        assert!(!next.human_validated);
        assert!(next.referrer);
    }

    #[test]
    fn test_degrade_follows_fixed_order() {
        let mut caps = StoreCapabilities::full();
        let mut order = Vec::new();
        while let Some((next, dropped)) = caps.degrade_for_error(None) {
            order.push(dropped);
            caps = next;
        }
        assert_eq!(order, FALLBACK_ORDER.to_vec());
        assert_eq!(caps, StoreCapabilities::none());
    }

    #[test]
    fn test_degrade_required_or_already_dropped_name_gives_up() {
        let caps = StoreCapabilities::full().without(OptionalColumn::Referrer);
        assert!(caps.degrade_for_error(Some("referrer")).is_none());
        assert!(caps.degrade_for_error(Some("device")).is_none());
        assert!(caps.degrade_for_error(Some("updated_at")).is_none());
    }

    #[test]
    fn test_insert_wording_drops_the_named_column() {
        let message = r#"column "raw_address" of relation "analytics_sessions" does not exist"#;
        let name = undefined_column_name(message);
        assert_eq!(name.as_deref(), Some("raw_address"));

        let (next, dropped) = StoreCapabilities::full()
            .degrade_for_error(name.as_deref())
            .unwrap();
        assert_eq!(dropped, OptionalColumn::RawAddress);
        assert_eq!(next, StoreCapabilities::full().without(OptionalColumn::RawAddress));
    }

    #[test]
    fn test_degrade_terminates() {
        assert!(StoreCapabilities::none().degrade_for_error(Some("is_bot")).is_none());
    }

    #[test]
    fn test_undefined_column_name_parsing() {
        assert_eq!(
            undefined_column_name(r#"column "referrer" does not exist"#).as_deref(),
            Some("referrer")
        );
        assert_eq!(
            undefined_column_name("column s.user_agent does not exist").as_deref(),
            Some("user_agent")
        );
        assert_eq!(
            undefined_column_name(r#"column "analytics_sessions"."is_bot" does not exist"#)
                .as_deref(),
            Some("is_bot")
        );
        assert_eq!(
            undefined_column_name(r#"column "human_validated" of relation "analytics_sessions" does not exist"#)
                .as_deref(),
            Some("human_validated")
        );
        assert_eq!(undefined_column_name("relation \"x\" does not exist"), None);
    }
}
