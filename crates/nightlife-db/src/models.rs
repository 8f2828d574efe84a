//! Database row types. These map directly to SQLite rows and are kept apart
//! from the nightlife-types API models so the store stays independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub last_search_location: String,
}

pub struct AttendanceRow {
    pub venue_id: String,
    pub user_id: String,
}

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The constraint rejected the row; an equivalent one already exists.
    Duplicate,
}
