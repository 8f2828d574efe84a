use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use nightlife_db::Database;
use nightlife_db::models::{AttendanceRow, InsertOutcome};
use nightlife_types::models::{Identity, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::storage;

pub const MAX_VENUE_ID_LEN: usize = 128;

/// Goer count for a venue and whether the caller is among them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GoerStatus {
    pub goers_count: u64,
    pub is_caller_going: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(GoerStatus),
    /// The caller already had a membership, possibly inserted by a racing join.
    AlreadyGoing(GoerStatus),
}

impl JoinOutcome {
    pub fn status(&self) -> GoerStatus {
        match self {
            Self::Joined(s) | Self::AlreadyGoing(s) => *s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left(GoerStatus),
    /// Nothing to remove; the caller was not going.
    WasNotGoing(GoerStatus),
}

impl LeaveOutcome {
    pub fn status(&self) -> GoerStatus {
        match self {
            Self::Left(s) | Self::WasNotGoing(s) => *s,
        }
    }
}

/// Sole writer of attendance records, and the only reader that turns them
/// into counts.
///
/// Per (venue, user) pair there are two states: a record exists or it does
/// not. `join` and `leave` are idempotent moves between them. No in-process
/// lock guards the pair; the store's UNIQUE(venue_id, user_id) does.
#[derive(Clone)]
pub struct AttendanceReconciler {
    db: Arc<Database>,
}

impl AttendanceReconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Goer status for each requested venue, from one batched read.
    pub async fn augment(
        &self,
        venue_ids: &[String],
        caller: &Identity,
    ) -> ApiResult<HashMap<String, GoerStatus>> {
        if venue_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = venue_ids.to_vec();
        let rows = storage::run(&self.db, "attendance.augment", move |db| {
            db.get_attendance_for_venues(&ids)
        })
        .await?;

        let caller_id = caller.user().map(|u| u.id.to_string());
        Ok(tally(venue_ids, &rows, caller_id.as_deref()))
    }

    pub async fn join(&self, venue_id: &str, user: &UserSummary) -> ApiResult<JoinOutcome> {
        let venue = validate_venue_id(venue_id)?;
        let user_id = user.id.to_string();

        let (outcome, goers_count) = storage::run(&self.db, "attendance.join", move |db| {
            // Fast path only; the insert below is what actually decides.
            let outcome = if db.attendance_exists(&venue, &user_id)? {
                InsertOutcome::Duplicate
            } else {
                db.insert_attendance(&Uuid::new_v4().to_string(), &venue, &user_id)?
            };
            let count = db.count_goers(&venue)?;
            Ok((outcome, count))
        })
        .await?;

        let status = GoerStatus {
            goers_count,
            is_caller_going: true,
        };
        match outcome {
            InsertOutcome::Inserted => {
                info!("{} is going to {} ({} goers)", user.username, venue_id.trim(), goers_count);
                Ok(JoinOutcome::Joined(status))
            }
            InsertOutcome::Duplicate => {
                debug!("{} already going to {}", user.username, venue_id.trim());
                Ok(JoinOutcome::AlreadyGoing(status))
            }
        }
    }

    pub async fn leave(&self, venue_id: &str, user: &UserSummary) -> ApiResult<LeaveOutcome> {
        let venue = validate_venue_id(venue_id)?;
        let user_id = user.id.to_string();

        let (removed, goers_count) = storage::run(&self.db, "attendance.leave", move |db| {
            let removed = db.delete_attendance(&venue, &user_id)?;
            let count = db.count_goers(&venue)?;
            Ok((removed, count))
        })
        .await?;

        let status = GoerStatus {
            goers_count,
            is_caller_going: false,
        };
        if removed {
            info!("{} is no longer going to {} ({} goers)", user.username, venue_id.trim(), goers_count);
            Ok(LeaveOutcome::Left(status))
        } else {
            debug!("{} was not going to {}", user.username, venue_id.trim());
            Ok(LeaveOutcome::WasNotGoing(status))
        }
    }
}

/// Group fetched memberships by venue. Linear in venues plus rows.
///
/// Every requested venue gets an entry, zero if nobody is going. Rows for
/// venues that were not requested are ignored.
fn tally(venue_ids: &[String], rows: &[AttendanceRow], caller_id: Option<&str>) -> HashMap<String, GoerStatus> {
    let mut statuses: HashMap<String, GoerStatus> = venue_ids
        .iter()
        .map(|id| (id.clone(), GoerStatus::default()))
        .collect();

    for row in rows {
        if let Some(status) = statuses.get_mut(&row.venue_id) {
            status.goers_count += 1;
            if caller_id == Some(row.user_id.as_str()) {
                status.is_caller_going = true;
            }
        }
    }

    statuses
}

fn validate_venue_id(raw: &str) -> ApiResult<String> {
    let venue = raw.trim();
    if venue.is_empty() {
        return Err(ApiError::invalid_input("Venue id is required."));
    }
    if venue.chars().count() > MAX_VENUE_ID_LEN {
        return Err(ApiError::invalid_input("Venue id is too long."));
    }
    Ok(venue.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Database>, AttendanceReconciler) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (db.clone(), AttendanceReconciler::new(db))
    }

    fn user(db: &Database, name: &str) -> UserSummary {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), name, "hash").unwrap();
        UserSummary {
            id,
            username: name.into(),
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tally_counts_and_flags_caller() {
        let rows = vec![
            AttendanceRow { venue_id: "a".into(), user_id: "u1".into() },
            AttendanceRow { venue_id: "a".into(), user_id: "u2".into() },
            AttendanceRow { venue_id: "b".into(), user_id: "u2".into() },
            AttendanceRow { venue_id: "z".into(), user_id: "u1".into() },
        ];

        let statuses = tally(&ids(&["a", "b", "c"]), &rows, Some("u1"));
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses["a"], GoerStatus { goers_count: 2, is_caller_going: true });
        assert_eq!(statuses["b"], GoerStatus { goers_count: 1, is_caller_going: false });
        assert_eq!(statuses["c"], GoerStatus::default());

        let anonymous = tally(&ids(&["a"]), &rows, None);
        assert!(!anonymous["a"].is_caller_going);
    }

    #[tokio::test]
    async fn repeated_joins_create_one_record() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");

        let first = reconciler.join("abc123", &alice).await.unwrap();
        assert!(matches!(first, JoinOutcome::Joined(_)));
        assert_eq!(first.status().goers_count, 1);

        for _ in 0..3 {
            let again = reconciler.join("abc123", &alice).await.unwrap();
            assert_eq!(again, JoinOutcome::AlreadyGoing(GoerStatus { goers_count: 1, is_caller_going: true }));
        }
        assert_eq!(db.count_goers("abc123").unwrap(), 1);
    }

    #[tokio::test]
    async fn join_increments_existing_count_by_one() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        reconciler.join("abc123", &bob).await.unwrap();

        let joined = reconciler.join("abc123", &alice).await.unwrap();
        assert_eq!(joined.status().goers_count, 2);
        let repeat = reconciler.join("abc123", &alice).await.unwrap();
        assert_eq!(repeat.status().goers_count, 2);
    }

    #[tokio::test]
    async fn leave_without_membership_is_benign() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        reconciler.join("abc123", &bob).await.unwrap();

        let outcome = reconciler.leave("abc123", &alice).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::WasNotGoing(GoerStatus { goers_count: 1, is_caller_going: false }));
    }

    #[tokio::test]
    async fn join_leave_join_matches_single_join() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");

        reconciler.join("abc123", &alice).await.unwrap();
        let left = reconciler.leave("abc123", &alice).await.unwrap();
        assert_eq!(left, LeaveOutcome::Left(GoerStatus { goers_count: 0, is_caller_going: false }));
        let rejoined = reconciler.join("abc123", &alice).await.unwrap();

        assert_eq!(rejoined, JoinOutcome::Joined(GoerStatus { goers_count: 1, is_caller_going: true }));
        assert!(db.attendance_exists("abc123", &alice.id.to_string()).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_by_two_users_count_two() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let (a, b) = tokio::join!(reconciler.join("abc123", &alice), reconciler.join("abc123", &bob));
        assert!(a.unwrap().status().is_caller_going);
        assert!(b.unwrap().status().is_caller_going);
        assert_eq!(db.count_goers("abc123").unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_joins_for_same_pair_all_succeed() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            let alice = alice.clone();
            handles.push(tokio::spawn(async move { reconciler.join("abc123", &alice).await }));
        }

        let mut joined = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.status(), GoerStatus { goers_count: 1, is_caller_going: true });
            if matches!(outcome, JoinOutcome::Joined(_)) {
                joined += 1;
            }
        }
        assert_eq!(joined, 1);
    }

    #[tokio::test]
    async fn augment_on_nothing_skips_the_store() {
        let (db, reconciler) = setup();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE attendance")?;
            Ok(())
        })
        .unwrap();

        let empty = reconciler.augment(&[], &Identity::Anonymous).await.unwrap();
        assert!(empty.is_empty());

        let err = reconciler.augment(&ids(&["abc123"]), &Identity::Anonymous).await.unwrap_err();
        assert!(matches!(err, ApiError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn augment_reports_caller_membership() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        reconciler.join("a", &alice).await.unwrap();
        reconciler.join("a", &bob).await.unwrap();
        reconciler.join("b", &bob).await.unwrap();

        let venues = ids(&["a", "b", "c"]);
        let as_alice = reconciler
            .augment(&venues, &Identity::Authenticated(alice))
            .await
            .unwrap();
        assert_eq!(as_alice["a"], GoerStatus { goers_count: 2, is_caller_going: true });
        assert_eq!(as_alice["b"], GoerStatus { goers_count: 1, is_caller_going: false });
        assert_eq!(as_alice["c"], GoerStatus { goers_count: 0, is_caller_going: false });

        let anonymous = reconciler.augment(&venues, &Identity::Anonymous).await.unwrap();
        assert!(anonymous.values().all(|s| !s.is_caller_going));
    }

    #[tokio::test]
    async fn blank_venue_ids_are_rejected() {
        let (db, reconciler) = setup();
        let alice = user(&db, "alice");

        assert!(matches!(reconciler.join("  ", &alice).await, Err(ApiError::InvalidInput(_))));
        let long = "v".repeat(MAX_VENUE_ID_LEN + 1);
        assert!(matches!(reconciler.leave(&long, &alice).await, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn venue_id_limit_counts_characters() {
        let accented = "é".repeat(MAX_VENUE_ID_LEN);
        assert!(accented.len() > MAX_VENUE_ID_LEN);
        assert_eq!(validate_venue_id(&accented).unwrap(), accented);

        let too_long = "é".repeat(MAX_VENUE_ID_LEN + 1);
        assert!(matches!(validate_venue_id(&too_long), Err(ApiError::InvalidInput(_))));
    }
}
