use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use nightlife_db::Database;
use nightlife_types::models::{AugmentedVenue, Identity, UserSummary};

use crate::attendance::AttendanceReconciler;
use crate::error::{ApiError, ApiResult};
use crate::provider::{BAR_CATEGORY, ProviderError, VenueProvider, VenueQuery};
use crate::storage;

pub const MAX_LOCATION_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub limit: u32,
    pub sort_by_distance: bool,
    pub timeout: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 20,
            sort_by_distance: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Provider search, then last-location bookkeeping, then attendance.
#[derive(Clone)]
pub struct SearchOrchestrator {
    provider: Arc<dyn VenueProvider>,
    attendance: AttendanceReconciler,
    db: Arc<Database>,
    settings: SearchSettings,
}

impl SearchOrchestrator {
    pub fn new(
        provider: Arc<dyn VenueProvider>,
        attendance: AttendanceReconciler,
        db: Arc<Database>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            provider,
            attendance,
            db,
            settings,
        }
    }

    /// Venues for `location` in provider order, each with its goer state.
    ///
    /// The provider call is not retried. Once it succeeds, even with no
    /// venues, an authenticated caller's last search location is updated.
    pub async fn search(&self, location: &str, caller: &Identity) -> ApiResult<Vec<AugmentedVenue>> {
        let location = validate_location(location)?;

        let query = VenueQuery {
            location: location.clone(),
            category: BAR_CATEGORY,
            limit: self.settings.limit,
            sort_by_distance: self.settings.sort_by_distance,
        };
        let venues = match tokio::time::timeout(self.settings.timeout, self.provider.search(&query)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::TimedOut(self.settings.timeout)),
        }
        .map_err(|e| {
            match &e {
                ProviderError::Misconfigured(_) => error!("Venue provider misconfigured: {}", e),
                _ => warn!("Venue search for '{}' failed: {}", location, e),
            }
            ApiError::UpstreamUnavailable("Failed to fetch bars from the venue provider.".into())
        })?;

        if let Some(user) = caller.user() {
            self.remember_location(user, &location).await;
        }

        let ids: Vec<String> = venues.iter().map(|v| v.id.clone()).collect();
        let statuses = self.attendance.augment(&ids, caller).await?;

        let augmented = venues
            .into_iter()
            .map(|venue| {
                let status = statuses.get(&venue.id).copied().unwrap_or_default();
                AugmentedVenue {
                    venue,
                    goers_count: status.goers_count,
                    is_user_going: status.is_caller_going,
                }
            })
            .collect();

        Ok(augmented)
    }

    /// Best effort: a failure here is logged and the search still answers.
    async fn remember_location(&self, user: &UserSummary, location: &str) {
        let id = user.id.to_string();
        let text = location.to_string();
        let saved = storage::run(&self.db, "search.remember_location", move |db| {
            db.set_last_search_location(&id, &text)
        })
        .await;

        match saved {
            Ok(true) => info!("Saved last search location \"{}\" for user {}", location, user.username),
            Ok(false) => warn!("Authenticated user {} not found while saving search location", user.id),
            Err(e) => warn!("Could not save search location for user {}: {}", user.id, e),
        }
    }
}

fn validate_location(raw: &str) -> ApiResult<String> {
    let location = raw.trim();
    if location.is_empty() {
        return Err(ApiError::invalid_input("Location query parameter is required."));
    }
    if location.chars().count() > MAX_LOCATION_LEN {
        return Err(ApiError::invalid_input("Location is too long."));
    }
    Ok(location.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;
    use uuid::Uuid;

    use nightlife_types::models::Venue;

    /// Canned provider that records what it was asked.
    struct FakeProvider {
        result: Result<Vec<Venue>, u16>,
        delay: Option<Duration>,
        seen: Mutex<Vec<VenueQuery>>,
    }

    impl FakeProvider {
        fn ok(venues: Vec<Venue>) -> Self {
            Self { result: Ok(venues), delay: None, seen: Mutex::new(vec![]) }
        }

        fn failing(status: u16) -> Self {
            Self { result: Err(status), delay: None, seen: Mutex::new(vec![]) }
        }
    }

    impl VenueProvider for FakeProvider {
        fn search<'a>(&'a self, query: &'a VenueQuery) -> BoxFuture<'a, Result<Vec<Venue>, ProviderError>> {
            self.seen.lock().unwrap().push(query.clone());
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.result.clone().map_err(ProviderError::Status)
            })
        }
    }

    struct Fixture {
        db: Arc<Database>,
        attendance: AttendanceReconciler,
        alice: UserSummary,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "alice", "hash").unwrap();
        Fixture {
            attendance: AttendanceReconciler::new(db.clone()),
            db,
            alice: UserSummary { id, username: "alice".into() },
        }
    }

    fn orchestrator(fx: &Fixture, provider: Arc<FakeProvider>) -> SearchOrchestrator {
        SearchOrchestrator::new(provider, fx.attendance.clone(), fx.db.clone(), SearchSettings::default())
    }

    fn last_location(fx: &Fixture) -> Option<String> {
        fx.db.get_last_search_location(&fx.alice.id.to_string()).unwrap()
    }

    #[tokio::test]
    async fn preserves_provider_order_and_augments() {
        let fx = fixture();
        fx.attendance.join("b", &fx.alice).await.unwrap();
        let provider = Arc::new(FakeProvider::ok(vec![
            Venue::new("c").with_detail("name", "C"),
            Venue::new("a"),
            Venue::new("b"),
        ]));
        let search = orchestrator(&fx, provider.clone());

        let results = search
            .search(" London ", &Identity::Authenticated(fx.alice.clone()))
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|v| v.venue.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(results[0].venue.details["name"], "C");
        assert_eq!((results[2].goers_count, results[2].is_user_going), (1, true));
        assert_eq!((results[1].goers_count, results[1].is_user_going), (0, false));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].location, "London");
        assert_eq!(seen[0].category, "bars");
        assert_eq!(seen[0].limit, 20);
    }

    #[tokio::test]
    async fn empty_location_never_reaches_provider() {
        let fx = fixture();
        let provider = Arc::new(FakeProvider::ok(vec![]));
        let search = orchestrator(&fx, provider.clone());

        let err = search.search("   ", &Identity::Anonymous).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_results_still_record_location() {
        let fx = fixture();
        let search = orchestrator(&fx, Arc::new(FakeProvider::ok(vec![])));

        let results = search
            .search("Atlantis", &Identity::Authenticated(fx.alice.clone()))
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(last_location(&fx).as_deref(), Some("Atlantis"));
    }

    #[tokio::test]
    async fn upstream_failure_leaves_location_untouched() {
        let fx = fixture();
        fx.db.set_last_search_location(&fx.alice.id.to_string(), "Paris").unwrap();
        let search = orchestrator(&fx, Arc::new(FakeProvider::failing(503)));

        let err = search
            .search("London", &Identity::Authenticated(fx.alice.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
        assert_eq!(last_location(&fx).as_deref(), Some("Paris"));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let fx = fixture();
        let provider = Arc::new(FakeProvider {
            delay: Some(Duration::from_secs(5)),
            ..FakeProvider::ok(vec![Venue::new("a")])
        });
        let search = SearchOrchestrator::new(
            provider,
            fx.attendance.clone(),
            fx.db.clone(),
            SearchSettings {
                timeout: Duration::from_millis(50),
                ..SearchSettings::default()
            },
        );

        let err = search
            .search("London", &Identity::Authenticated(fx.alice.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
        assert_eq!(last_location(&fx).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn anonymous_search_persists_nothing() {
        let fx = fixture();
        let search = orchestrator(&fx, Arc::new(FakeProvider::ok(vec![Venue::new("a")])));

        let results = search.search("London", &Identity::Anonymous).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(last_location(&fx).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn failed_location_write_does_not_fail_search() {
        let fx = fixture();
        let search = orchestrator(&fx, Arc::new(FakeProvider::ok(vec![Venue::new("a")])));
        let ghost = UserSummary { id: Uuid::new_v4(), username: "ghost".into() };

        let results = search.search("London", &Identity::Authenticated(ghost)).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
