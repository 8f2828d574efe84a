use crate::Database;
use crate::models::{AttendanceRow, InsertOutcome, UserRow};
use anyhow::Result;
use rusqlite::{Connection, ErrorCode, ffi};

impl Database {
    // -- Users --

    /// Insert a user. A taken username comes back as `Duplicate`, not an error.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<InsertOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            );
            guarded_insert(inserted)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Returns false if no such user exists.
    pub fn set_last_search_location(&self, user_id: &str, location: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET last_search_location = ?1 WHERE id = ?2",
                (location, user_id),
            )?;
            Ok(updated > 0)
        })
    }

    pub fn get_last_search_location(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT last_search_location FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Attendance --

    pub fn attendance_exists(&self, venue_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM attendance WHERE venue_id = ?1 AND user_id = ?2",
                    (venue_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Insert a (venue, user) membership. The UNIQUE(venue_id, user_id)
    /// constraint decides races: a losing insert reports `Duplicate`.
    pub fn insert_attendance(&self, id: &str, venue_id: &str, user_id: &str) -> Result<InsertOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO attendance (id, venue_id, user_id) VALUES (?1, ?2, ?3)",
                (id, venue_id, user_id),
            );
            guarded_insert(inserted)
        })
    }

    /// Returns true if a row was removed.
    pub fn delete_attendance(&self, venue_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM attendance WHERE venue_id = ?1 AND user_id = ?2",
                (venue_id, user_id),
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn count_goers(&self, venue_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM attendance WHERE venue_id = ?1",
                [venue_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// Batch-fetch memberships for a set of venue ids in one query.
    pub fn get_attendance_for_venues(&self, venue_ids: &[String]) -> Result<Vec<AttendanceRow>> {
        if venue_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=venue_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT venue_id, user_id FROM attendance WHERE venue_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(venue_ids.iter()), |row| {
                    Ok(AttendanceRow {
                        venue_id: row.get(0)?,
                        user_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, last_search_location FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                last_search_location: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Map a UNIQUE / PRIMARY KEY violation to `Duplicate`. Any other failure,
/// including foreign key violations, stays an error.
fn guarded_insert(result: rusqlite::Result<usize>) -> Result<InsertOutcome> {
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db_with_user(username: &str) -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        assert_eq!(db.create_user(&id, username, "hash").unwrap(), InsertOutcome::Inserted);
        (db, id)
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[test]
    fn duplicate_username_is_reported_not_raised() {
        let (db, _) = db_with_user("alice");
        let outcome = db.create_user(&new_id(), "alice", "other-hash").unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);
    }

    #[test]
    fn usernames_are_case_sensitive() {
        let (db, _) = db_with_user("alice");
        let outcome = db.create_user(&new_id(), "Alice", "hash").unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
    }

    #[test]
    fn user_lookup_by_name_and_id() {
        let (db, id) = db_with_user("alice");

        let by_name = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.last_search_location, "");

        let by_id = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn last_search_location_round_trips() {
        let (db, id) = db_with_user("alice");

        assert!(db.set_last_search_location(&id, "London").unwrap());
        assert_eq!(db.get_last_search_location(&id).unwrap().as_deref(), Some("London"));

        assert!(!db.set_last_search_location("missing", "Paris").unwrap());
        assert_eq!(db.get_last_search_location("missing").unwrap(), None);
    }

    #[test]
    fn second_attendance_insert_is_duplicate() {
        let (db, user) = db_with_user("alice");

        assert_eq!(db.insert_attendance(&new_id(), "bar-1", &user).unwrap(), InsertOutcome::Inserted);
        assert_eq!(db.insert_attendance(&new_id(), "bar-1", &user).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(db.count_goers("bar-1").unwrap(), 1);
        assert!(db.attendance_exists("bar-1", &user).unwrap());
    }

    #[test]
    fn attendance_for_unknown_user_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_attendance(&new_id(), "bar-1", "ghost").is_err());
    }

    #[test]
    fn delete_attendance_reports_whether_a_row_went() {
        let (db, user) = db_with_user("alice");
        db.insert_attendance(&new_id(), "bar-1", &user).unwrap();

        assert!(db.delete_attendance("bar-1", &user).unwrap());
        assert!(!db.delete_attendance("bar-1", &user).unwrap());
        assert_eq!(db.count_goers("bar-1").unwrap(), 0);
    }

    #[test]
    fn batched_attendance_only_returns_requested_venues() {
        let (db, alice) = db_with_user("alice");
        let bob = new_id();
        db.create_user(&bob, "bob", "hash").unwrap();

        db.insert_attendance(&new_id(), "bar-1", &alice).unwrap();
        db.insert_attendance(&new_id(), "bar-1", &bob).unwrap();
        db.insert_attendance(&new_id(), "bar-2", &bob).unwrap();
        db.insert_attendance(&new_id(), "bar-3", &alice).unwrap();

        let rows = db
            .get_attendance_for_venues(&["bar-1".to_string(), "bar-2".to_string(), "bar-9".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.venue_id != "bar-3"));
        assert!(db.get_attendance_for_venues(&[]).unwrap().is_empty());
    }
}
