//! Driver lookup collaborators.
//!
//! The session engine only sees [`DriverLookup`]. Shipped adapters:
//! - [`HttpDriverLookup`] calls the premium drivers API
//! - [`CachedDriverLookup`] keeps successful pages for a TTL
//! - [`StaticDriverLookup`] serves a fixed roster (CLI demo and tests)

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cabbot_core::config::LookupConfig;
use cabbot_core::domain::driver::{DriverPage, DriverQuery, DriverRecord, Vehicle};
use cabbot_core::errors::ConversationError;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SEARCH_RADIUS_KM: u32 = 100;
const SEARCH_STRATEGY: &str = "hybrid";
const SORT_BY: &str = "lastAccess:desc";
/// Default bound on cached pages.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("driver lookup timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("driver lookup unavailable: {0}")]
    Unavailable(String),
    #[error("driver lookup returned an unreadable payload: {0}")]
    Decode(String),
}

impl From<LookupError> for ConversationError {
    fn from(value: LookupError) -> Self {
        match value {
            LookupError::Timeout { timeout_secs } => Self::LookupTimeout { timeout_secs },
            LookupError::Unavailable(message) | LookupError::Decode(message) => {
                Self::LookupUnavailable(message)
            }
        }
    }
}

#[async_trait]
pub trait DriverLookup: Send + Sync {
    /// An empty page means "no match", never an error.
    async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError>;
}

pub struct HttpDriverLookup {
    client: Client,
    endpoint_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpDriverLookup {
    pub fn new(config: &LookupConfig) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| LookupError::Unavailable(format!("http client: {error}")))?;
        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
        })
    }

    fn query_params(query: &DriverQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("limit", query.page_size.to_string()),
            ("radius", SEARCH_RADIUS_KM.to_string()),
            ("searchStrategy", SEARCH_STRATEGY.to_string()),
            ("sortBy", SORT_BY.to_string()),
        ];
        if let Some(city) = &query.city {
            params.push(("city", city.clone()));
        }
        if let Some(language) = &query.language {
            params.push(("verifiedLanguages", language.clone()));
        }
        params
    }
}

#[async_trait]
impl DriverLookup for HttpDriverLookup {
    async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError> {
        let mut request =
            self.client.get(&self.endpoint_url).query(&Self::query_params(query));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LookupError::Timeout { timeout_secs: self.timeout.as_secs() }
            } else {
                LookupError::Unavailable(format!("request failed: {error}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                event_name = "lookup.http.status",
                status = status.as_u16(),
                city = query.city.as_deref().unwrap_or(""),
                "driver api returned an error status"
            );
            return Err(LookupError::Unavailable(format!("driver api returned {status}")));
        }

        let envelope: DriversEnvelope = response
            .json()
            .await
            .map_err(|error| LookupError::Decode(format!("driver api body: {error}")))?;
        if !envelope.success {
            return Err(LookupError::Unavailable(
                envelope.message.unwrap_or_else(|| "driver api reported failure".to_string()),
            ));
        }

        let drivers: Vec<DriverRecord> =
            envelope.data.unwrap_or_default().into_iter().map(DriverRecord::from).collect();
        let has_more = drivers.len() as u64 >= u64::from(query.page_size);
        debug!(
            event_name = "lookup.http.completed",
            count = drivers.len(),
            page = query.page,
            "driver api answered"
        );
        Ok(DriverPage { query: query.clone(), drivers, has_more })
    }
}

#[derive(Debug, Deserialize)]
struct DriversEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Vec<PremiumDriverPayload>>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumDriverPayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    phone_no: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    experience: Option<f64>,
    #[serde(default)]
    is_pet_allowed: Option<bool>,
    #[serde(default)]
    verified_languages: Vec<LanguageEntry>,
    #[serde(default)]
    verified_vehicles: Vec<VehiclePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LanguageEntry {
    Plain(String),
    Named { name: String },
}

impl LanguageEntry {
    fn into_name(self) -> String {
        match self {
            Self::Plain(name) | Self::Named { name } => name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VehiclePayload {
    #[serde(default)]
    model: Option<String>,
    #[serde(default, rename = "vehicleType")]
    vehicle_type: Option<String>,
    #[serde(default)]
    reg_no: Option<String>,
    #[serde(default, rename = "perKmCost")]
    per_km_cost: Option<Decimal>,
    #[serde(default)]
    is_commercial: Option<bool>,
}

impl From<PremiumDriverPayload> for DriverRecord {
    fn from(payload: PremiumDriverPayload) -> Self {
        let name = payload
            .name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| payload.user_name.clone())
            .unwrap_or_else(|| "Unnamed driver".to_string());
        Self {
            id: payload.id,
            name,
            city: payload.city,
            phone: payload.phone_no,
            username: payload.user_name,
            languages: payload
                .verified_languages
                .into_iter()
                .map(LanguageEntry::into_name)
                .filter(|language| !language.trim().is_empty())
                .collect(),
            experience_years: payload
                .experience
                .filter(|years| years.is_finite() && *years >= 0.0)
                .map(|years| years.round() as u32),
            pet_allowed: payload.is_pet_allowed,
            vehicles: payload
                .verified_vehicles
                .into_iter()
                .map(|vehicle| Vehicle {
                    model: vehicle.model.unwrap_or_default(),
                    vehicle_type: vehicle.vehicle_type.unwrap_or_default(),
                    registration: vehicle.reg_no,
                    per_km_cost: vehicle.per_km_cost,
                    commercial: vehicle.is_commercial.unwrap_or(false),
                })
                .collect(),
        }
    }
}

struct CacheEntry {
    stored_at: Instant,
    page: DriverPage,
}

/// Serves repeated queries from memory for `ttl`; only successful lookups are kept.
///
/// Expired pages are swept whenever a new page is stored, and the map never holds more than
/// `capacity` pages (the oldest goes first).
pub struct CachedDriverLookup<L> {
    inner: L,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<L> CachedDriverLookup<L>
where
    L: DriverLookup,
{
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self { inner, ttl, capacity: DEFAULT_CACHE_CAPACITY, entries: Mutex::new(HashMap::new()) }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Drops every page older than the TTL, returning how many went.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        purge(&mut entries, self.ttl)
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl<L> DriverLookup for CachedDriverLookup<L>
where
    L: DriverLookup,
{
    async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError> {
        let key = query.cache_key();
        {
            let mut entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    debug!(event_name = "lookup.cache.hit", cache_key = %key, "cache hit");
                    return Ok(entry.page.clone());
                }
                Some(_) => {
                    entries.remove(&key);
                }
                None => {}
            }
        }

        let page = self.inner.find_drivers(query).await?;
        if !self.ttl.is_zero() {
            let mut entries = self.entries.lock().await;
            let purged = purge(&mut entries, self.ttl);
            if purged > 0 {
                debug!(event_name = "lookup.cache.purged", purged, "expired cache entries dropped");
            }
            while entries.len() >= self.capacity && !entries.contains_key(&key) {
                let Some(oldest) = oldest_key(&entries) else { break };
                entries.remove(&oldest);
            }
            entries.insert(key, CacheEntry { stored_at: Instant::now(), page: page.clone() });
        }
        Ok(page)
    }
}

fn purge(entries: &mut HashMap<String, CacheEntry>, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
    before - entries.len()
}

fn oldest_key(entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries.iter().min_by_key(|(_, entry)| entry.stored_at).map(|(key, _)| key.clone())
}

/// Fixed driver roster filtered and paged in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticDriverLookup {
    drivers: Vec<DriverRecord>,
}

impl StaticDriverLookup {
    pub fn new(drivers: Vec<DriverRecord>) -> Self {
        Self { drivers }
    }

    /// A small roster across a few cities, used by the CLI `chat` command.
    pub fn demo() -> Self {
        let driver = |id: &str, name: &str, city: &str, languages: &[&str], cost: i64| {
            DriverRecord {
                id: id.to_string(),
                name: name.to_string(),
                city: Some(city.to_string()),
                phone: Some(format!("98000{}", &id[id.len().saturating_sub(5)..])),
                username: Some(name.to_lowercase().replace(' ', ".")),
                languages: languages.iter().map(|language| language.to_string()).collect(),
                experience_years: Some(5),
                pet_allowed: Some(false),
                vehicles: vec![Vehicle {
                    model: "Dzire".to_string(),
                    vehicle_type: "Sedan".to_string(),
                    registration: None,
                    per_km_cost: Some(Decimal::new(cost, 0)),
                    commercial: true,
                }],
            }
        };
        Self::new(vec![
            driver("drv-00001", "Ramesh Kumar", "Jaipur", &["Hindi", "English"], 12),
            driver("drv-00002", "Suresh Meena", "Jaipur", &["Hindi", "Rajasthani"], 11),
            driver("drv-00003", "Imran Khan", "Jaipur", &["Hindi", "Urdu", "English"], 13),
            driver("drv-00004", "Anil Patil", "Pune", &["Marathi", "Hindi"], 14),
            driver("drv-00005", "Karthik Raja", "Chennai", &["Tamil", "English"], 12),
            driver("drv-00006", "Gurpreet Singh", "Delhi", &["Punjabi", "Hindi"], 15),
        ])
    }
}

#[async_trait]
impl DriverLookup for StaticDriverLookup {
    async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError> {
        let matching: Vec<&DriverRecord> = self
            .drivers
            .iter()
            .filter(|driver| query.city.as_deref().map_or(true, |city| driver.serves(city)))
            .filter(|driver| {
                query.language.as_deref().map_or(true, |language| driver.speaks(language))
            })
            .collect();

        let page_size = query.page_size.max(1) as usize;
        let start = (query.page.max(1) as usize - 1) * page_size;
        let drivers: Vec<DriverRecord> =
            matching.iter().skip(start).take(page_size).map(|driver| (*driver).clone()).collect();
        let has_more = matching.len() > start + drivers.len();

        Ok(DriverPage { query: query.clone(), drivers, has_more })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use cabbot_core::config::AppConfig;
    use cabbot_core::domain::driver::{DriverPage, DriverQuery};
    use cabbot_core::errors::ConversationError;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use super::{
        CachedDriverLookup, DriverLookup, HttpDriverLookup, LookupError, StaticDriverLookup,
    };

    fn query(city: Option<&str>, language: Option<&str>, page: u32) -> DriverQuery {
        DriverQuery {
            city: city.map(str::to_string),
            language: language.map(str::to_string),
            page,
            page_size: 2,
        }
    }

    struct CountingLookup {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl DriverLookup for CountingLookup {
        async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Unavailable("down".to_string()));
            }
            Ok(DriverPage { query: query.clone(), drivers: Vec::new(), has_more: false })
        }
    }

    #[tokio::test]
    async fn static_lookup_filters_by_city_and_language() {
        let lookup = StaticDriverLookup::demo();
        let page = lookup
            .find_drivers(&query(Some("jaipur"), Some("english"), 1))
            .await
            .expect("lookup");

        let names: Vec<&str> = page.drivers.iter().map(|driver| driver.name.as_str()).collect();
        assert_eq!(names, vec!["Ramesh Kumar", "Imran Khan"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn static_lookup_pages_results() {
        let lookup = StaticDriverLookup::demo();
        let first = lookup.find_drivers(&query(Some("Jaipur"), None, 1)).await.expect("page 1");
        let second = lookup.find_drivers(&query(Some("Jaipur"), None, 2)).await.expect("page 2");

        assert_eq!(first.drivers.len(), 2);
        assert!(first.has_more);
        assert_eq!(second.drivers.len(), 1);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn unknown_city_is_an_empty_page_not_an_error() {
        let page = StaticDriverLookup::demo()
            .find_drivers(&query(Some("Atlantis"), None, 1))
            .await
            .expect("lookup");
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn cache_serves_repeat_queries_within_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = CachedDriverLookup::new(
            CountingLookup { calls: calls.clone(), fail: false },
            Duration::from_secs(300),
        );

        cached.find_drivers(&query(Some("Jaipur"), None, 1)).await.expect("first");
        cached.find_drivers(&query(Some("JAIPUR"), None, 1)).await.expect("second");
        cached.find_drivers(&query(Some("Jaipur"), None, 2)).await.expect("other page");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.len().await, 2);
        assert_eq!(cached.clear().await, 2);
    }

    #[tokio::test]
    async fn cache_expires_entries_and_skips_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = CachedDriverLookup::new(
            CountingLookup { calls: calls.clone(), fail: false },
            Duration::from_millis(20),
        );
        cached.find_drivers(&query(Some("Pune"), None, 1)).await.expect("first");
        tokio::time::sleep(Duration::from_millis(50)).await;
        cached.find_drivers(&query(Some("Pune"), None, 1)).await.expect("after ttl");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let failing_calls = Arc::new(AtomicUsize::new(0));
        let failing = CachedDriverLookup::new(
            CountingLookup { calls: failing_calls.clone(), fail: true },
            Duration::from_secs(300),
        );
        assert!(failing.find_drivers(&query(Some("Pune"), None, 1)).await.is_err());
        assert!(failing.find_drivers(&query(Some("Pune"), None, 1)).await.is_err());
        assert_eq!(failing_calls.load(Ordering::SeqCst), 2);
        assert_eq!(failing.len().await, 0);
    }

    #[tokio::test]
    async fn cache_sweeps_expired_pages_of_other_queries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = CachedDriverLookup::new(
            CountingLookup { calls: calls.clone(), fail: false },
            Duration::from_millis(30),
        );
        for city in ["Jaipur", "Pune", "Delhi"] {
            cached.find_drivers(&query(Some(city), None, 1)).await.expect("lookup");
        }
        assert_eq!(cached.len().await, 3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        cached.find_drivers(&query(Some("Chennai"), None, 1)).await.expect("fresh query");
        assert_eq!(cached.len().await, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cached.purge_expired().await, 1);
        assert_eq!(cached.len().await, 0);
    }

    #[tokio::test]
    async fn cache_evicts_the_oldest_page_at_capacity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = CachedDriverLookup::new(
            CountingLookup { calls: calls.clone(), fail: false },
            Duration::from_secs(300),
        )
        .with_capacity(2);

        cached.find_drivers(&query(Some("Jaipur"), None, 1)).await.expect("jaipur");
        tokio::time::sleep(Duration::from_millis(5)).await;
        cached.find_drivers(&query(Some("Pune"), None, 1)).await.expect("pune");
        tokio::time::sleep(Duration::from_millis(5)).await;
        cached.find_drivers(&query(Some("Delhi"), None, 1)).await.expect("delhi");
        assert_eq!(cached.len().await, 2);

        cached.find_drivers(&query(Some("Pune"), None, 1)).await.expect("pune again");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        cached.find_drivers(&query(Some("Jaipur"), None, 1)).await.expect("jaipur again");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn lookup_errors_map_to_conversation_errors() {
        assert_eq!(
            ConversationError::from(LookupError::Timeout { timeout_secs: 20 }),
            ConversationError::LookupTimeout { timeout_secs: 20 }
        );
        assert!(matches!(
            ConversationError::from(LookupError::Decode("bad json".to_string())),
            ConversationError::LookupUnavailable(_)
        ));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}/drivers")
    }

    fn http_lookup(endpoint_url: String, timeout_secs: u64) -> HttpDriverLookup {
        let mut config = AppConfig::default().lookup;
        config.endpoint_url = endpoint_url;
        config.timeout_secs = timeout_secs;
        HttpDriverLookup::new(&config).expect("client")
    }

    #[tokio::test]
    async fn http_lookup_sends_filters_and_decodes_drivers() {
        let router = Router::new().route(
            "/drivers",
            get(|Query(params): Query<std::collections::HashMap<String, String>>| async move {
                assert_eq!(params.get("city").map(String::as_str), Some("Jaipur"));
                assert_eq!(params.get("verifiedLanguages").map(String::as_str), Some("Hindi"));
                assert_eq!(params.get("page").map(String::as_str), Some("1"));
                assert_eq!(params.get("limit").map(String::as_str), Some("2"));
                Json(json!({
                    "success": true,
                    "data": [{
                        "id": "drv-1",
                        "name": "Ramesh Kumar",
                        "city": "Jaipur",
                        "phoneNo": "9800000001",
                        "userName": "ramesh",
                        "experience": 7,
                        "isPetAllowed": true,
                        "verifiedLanguages": ["Hindi", {"name": "English"}],
                        "verifiedVehicles": [{
                            "model": "Innova",
                            "vehicleType": "SUV",
                            "reg_no": "RJ14 AB 1234",
                            "perKmCost": 18.5,
                            "is_commercial": true
                        }]
                    }]
                }))
            }),
        );
        let lookup = http_lookup(serve(router).await, 5);

        let page = lookup
            .find_drivers(&query(Some("Jaipur"), Some("Hindi"), 1))
            .await
            .expect("lookup should succeed");

        assert_eq!(page.drivers.len(), 1);
        let driver = &page.drivers[0];
        assert_eq!(driver.languages, vec!["Hindi".to_string(), "English".to_string()]);
        assert_eq!(driver.experience_years, Some(7));
        assert_eq!(driver.pet_allowed, Some(true));
        assert_eq!(driver.vehicles[0].per_km_cost, Some(Decimal::new(185, 1)));
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn http_lookup_reports_api_failure_as_unavailable() {
        let router = Router::new().route(
            "/drivers",
            get(|| async { Json(json!({"success": false, "message": "quota exceeded"})) }),
        );
        let lookup = http_lookup(serve(router).await, 5);

        let error = lookup.find_drivers(&query(Some("Pune"), None, 1)).await.expect_err("fails");
        assert_eq!(error, LookupError::Unavailable("quota exceeded".to_string()));
    }

    #[tokio::test]
    async fn http_lookup_treats_error_status_as_unavailable() {
        let router = Router::new().route(
            "/drivers",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, Json(Value::Null)) }),
        );
        let lookup = http_lookup(serve(router).await, 5);

        let error = lookup.find_drivers(&query(Some("Pune"), None, 1)).await.expect_err("fails");
        assert!(matches!(error, LookupError::Unavailable(ref message) if message.contains("502")));
    }

    #[tokio::test]
    async fn http_lookup_times_out() {
        let router = Router::new().route(
            "/drivers",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"success": true, "data": []}))
            }),
        );
        let lookup = http_lookup(serve(router).await, 1);

        let error = lookup.find_drivers(&query(Some("Pune"), None, 1)).await.expect_err("times out");
        assert_eq!(error, LookupError::Timeout { timeout_secs: 1 });
    }
}
