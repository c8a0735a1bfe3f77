//! HTTP surface: public calendar lookup, push (un)subscription and the
//! scheduler-triggered send endpoint.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::calendar::CalendarTable;
use crate::clock;
use crate::config::Settings;
use crate::dispatch::{self, Dispatcher};
use crate::error::{ApiError, ApiResult};
use crate::message;
use crate::models::{CycleDay, DayInfo, Slot, SpecialKind, Subscription, SubscriptionKeys};
use crate::push::PushTransport;
use crate::subscriptions::SubscriptionStore;

const INVALID_SUBSCRIPTION: &str =
    "Invalid subscription: endpoint, keys.p256dh, and keys.auth are required.";
const INVALID_UNSUBSCRIBE: &str = "Invalid request: endpoint is required.";
const UNAUTHORIZED: &str = "Unauthorized: invalid or missing authorization header.";
const PUSH_NOT_CONFIGURED: &str = "push notifications are not configured";

#[derive(Clone)]
pub struct AppState {
    pub calendar: Arc<CalendarTable>,
    pub store: SubscriptionStore,
    /// `None` when no VAPID private key is configured; sends then answer 503.
    pub transport: Option<Arc<dyn PushTransport>>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        calendar: Arc<CalendarTable>,
        store: SubscriptionStore,
        transport: Option<Arc<dyn PushTransport>>,
        settings: Settings,
    ) -> Self {
        let dispatcher = transport.as_ref().map(|transport| {
            Arc::new(Dispatcher::new(
                calendar.clone(),
                store.clone(),
                transport.clone(),
            ))
        });
        Self {
            calendar,
            store,
            transport,
            dispatcher,
            settings: Arc::new(settings),
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> ApiResult<()> {
        let header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
        if self.settings.is_authorized(header) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized(UNAUTHORIZED.to_string()))
        }
    }

    fn dispatcher(&self) -> ApiResult<&Dispatcher> {
        self.dispatcher
            .as_deref()
            .ok_or_else(|| ApiError::Unavailable(PUSH_NOT_CONFIGURED.to_string()))
    }

    fn transport(&self) -> ApiResult<&dyn PushTransport> {
        self.transport
            .as_deref()
            .ok_or_else(|| ApiError::Unavailable(PUSH_NOT_CONFIGURED.to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/today", get(today))
        .route("/api/push/public-key", get(public_key))
        .route("/api/push/subscribe", post(subscribe))
        .route("/api/push/unsubscribe", post(unsubscribe))
        .route("/api/push/send", get(send).post(send))
        .route("/api/push/test", post(send_test))
        .route("/api/push/debug", get(debug_status))
        .route("/api/push/clear-all", post(clear_all))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TodayResponse {
    date: NaiveDate,
    cycle_day: Option<CycleDay>,
    special: Option<SpecialKind>,
    label: Option<String>,
}

impl TodayResponse {
    fn new(date: NaiveDate, info: Option<DayInfo>) -> Self {
        match info {
            Some(info) => Self {
                date,
                cycle_day: info.cycle_day,
                special: info.special,
                label: info.label,
            },
            None => Self {
                date,
                cycle_day: None,
                special: None,
                label: None,
            },
        }
    }
}

async fn today(State(state): State<AppState>) -> Json<TodayResponse> {
    let today = clock::today_info(&state.calendar, Utc::now());
    Json(TodayResponse::new(today.date, today.info))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    public_key: String,
}

async fn public_key(State(state): State<AppState>) -> ApiResult<Json<PublicKeyResponse>> {
    let key = state
        .settings
        .vapid_public_key()
        .ok_or_else(|| ApiError::Unavailable(PUSH_NOT_CONFIGURED.to_string()))?;
    Ok(Json(PublicKeyResponse {
        public_key: key.to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SubscriptionBody {
    endpoint: Option<String>,
    keys: Option<KeysBody>,
}

#[derive(Debug, Default, Deserialize)]
struct KeysBody {
    p256dh: Option<String>,
    auth: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SubscriptionBody {
    fn into_subscription(self) -> Option<Subscription> {
        let keys = self.keys?;
        Some(Subscription {
            endpoint: present(self.endpoint)?,
            keys: SubscriptionKeys {
                p256dh: present(keys.p256dh)?,
                auth: present(keys.auth)?,
            },
        })
    }
}

fn parse_subscription(
    payload: Result<Json<SubscriptionBody>, JsonRejection>,
) -> ApiResult<Subscription> {
    payload
        .ok()
        .and_then(|Json(body)| body.into_subscription())
        .ok_or_else(|| ApiError::BadRequest(INVALID_SUBSCRIPTION.to_string()))
}

async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionBody>, JsonRejection>,
) -> ApiResult<Json<OkResponse>> {
    let subscription = parse_subscription(payload)?;
    state.store.add(&subscription).await?;
    info!(endpoint = %subscription.endpoint, "push subscription registered");
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
struct UnsubscribeBody {
    endpoint: Option<String>,
}

async fn unsubscribe(
    State(state): State<AppState>,
    payload: Result<Json<UnsubscribeBody>, JsonRejection>,
) -> ApiResult<Json<OkResponse>> {
    let endpoint = payload
        .ok()
        .and_then(|Json(body)| present(body.endpoint))
        .ok_or_else(|| ApiError::BadRequest(INVALID_UNSUBSCRIBE.to_string()))?;
    state.store.remove(&endpoint).await?;
    info!(%endpoint, "push subscription removed");
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
struct SendQuery {
    slot: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    ok: bool,
    sent: usize,
    failed: usize,
    date: NaiveDate,
    slot: Slot,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    skipped: bool,
}

async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SendQuery>,
) -> ApiResult<Json<SendResponse>> {
    state.authorize(&headers)?;
    let slot = Slot::from_query(query.slot.as_deref());
    let report = state.dispatcher()?.dispatch(slot, Utc::now()).await?;
    Ok(Json(SendResponse {
        ok: true,
        sent: report.sent,
        failed: report.failed,
        date: report.date,
        slot: report.slot,
        skipped: report.skipped,
    }))
}

#[derive(Debug, Serialize)]
struct TestResponse {
    ok: bool,
    date: NaiveDate,
    title: String,
    body: String,
}

async fn send_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubscriptionBody>, JsonRejection>,
) -> ApiResult<Json<TestResponse>> {
    state.authorize(&headers)?;
    let subscription = parse_subscription(payload)?;
    let transport = state.transport()?;

    let content = dispatch::resolve_content(&state.calendar, Slot::Morning, Utc::now());
    let payload = message::push_payload(&content.message)?;
    transport
        .send(&subscription, &payload)
        .await
        .map_err(|err| ApiError::Upstream(err.to_string()))?;

    Ok(Json(TestResponse {
        ok: true,
        date: content.date,
        title: content.message.title,
        body: content.message.body,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugResponse {
    ok: bool,
    date: NaiveDate,
    today_info: DebugDay,
    subscriptions: SubscriptionSummary,
    deduplication: DedupStatus,
    config: ConfigStatus,
}

/// Today's entry without its date; absent fields serialize as `null`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugDay {
    cycle_day: Option<CycleDay>,
    special: Option<SpecialKind>,
    label: Option<String>,
}

impl From<TodayResponse> for DebugDay {
    fn from(today: TodayResponse) -> Self {
        Self {
            cycle_day: today.cycle_day,
            special: today.special,
            label: today.label,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubscriptionSummary {
    count: usize,
    endpoints: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DedupStatus {
    morning_dedup: Option<String>,
    evening_dedup: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigStatus {
    has_vapid_public: bool,
    has_vapid_private: bool,
    has_cron_secret: bool,
}

fn truncate_endpoint(endpoint: &str) -> String {
    let prefix: String = endpoint.chars().take(50).collect();
    format!("{prefix}...")
}

async fn debug_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<DebugResponse>> {
    state.authorize(&headers)?;

    let today = clock::today_info(&state.calendar, Utc::now());
    let endpoints = state.store.list_endpoints().await?;
    let morning_dedup = state.store.dedup_marker(Slot::Morning, today.date).await?;
    let evening_dedup = state.store.dedup_marker(Slot::Evening, today.date).await?;

    Ok(Json(DebugResponse {
        ok: true,
        date: today.date,
        today_info: TodayResponse::new(today.date, today.info).into(),
        subscriptions: SubscriptionSummary {
            count: endpoints.len(),
            endpoints: endpoints.iter().map(|e| truncate_endpoint(e)).collect(),
        },
        deduplication: DedupStatus {
            morning_dedup,
            evening_dedup,
        },
        config: ConfigStatus {
            has_vapid_public: state.settings.vapid_public_key().is_some(),
            has_vapid_private: state.transport.is_some(),
            has_cron_secret: state.settings.cron_secret().is_some(),
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClearAllResponse {
    ok: bool,
    cleared: usize,
    dedup_cleared: usize,
}

async fn clear_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ClearAllResponse>> {
    state.authorize(&headers)?;
    let (cleared, dedup_cleared) = state.store.clear_all().await?;
    info!(cleared, dedup_cleared, "cleared all push state");
    Ok(Json(ClearAllResponse {
        ok: true,
        cleared,
        dedup_cleared,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::calendar::build_school_calendar;
    use crate::dispatch::tests::{subscription, Outcome, RecordingTransport};
    use crate::kv::MemoryKv;

    const SECRET: &str = "cron-secret";

    fn settings() -> Settings {
        Settings {
            vapid_public_key: Some("BPublicKey".to_string()),
            vapid_private_key: Some("private-key-material".to_string()),
            cron_secret: Some(SECRET.to_string()),
            ..Settings::default()
        }
    }

    fn test_state(transport: RecordingTransport) -> (AppState, Arc<RecordingTransport>) {
        let calendar = Arc::new(build_school_calendar(None).unwrap());
        let store = SubscriptionStore::new(Arc::new(MemoryKv::new()));
        let transport = Arc::new(transport);
        let shared: Arc<dyn PushTransport> = transport.clone();
        (
            AppState::new(calendar, store, Some(shared), settings()),
            transport,
        )
    }

    fn state_without_push() -> AppState {
        let calendar = Arc::new(build_school_calendar(None).unwrap());
        let store = SubscriptionStore::new(Arc::new(MemoryKv::new()));
        let settings = Settings {
            vapid_public_key: None,
            vapid_private_key: None,
            ..settings()
        };
        AppState::new(calendar, store, None, settings)
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(payload) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn subscription_json(endpoint: &str) -> Value {
        json!({"endpoint": endpoint, "keys": {"p256dh": "BPk3", "auth": "secret"}})
    }

    #[tokio::test]
    async fn today_reports_a_date_key_and_nullable_fields() {
        let (state, _) = test_state(RecordingTransport::default());
        let router = router(state);

        let (status, body) = call(&router, Method::GET, "/api/today", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let date = body["date"].as_str().unwrap();
        assert!(NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok());
        for field in ["cycleDay", "special", "label"] {
            assert!(body.get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn subscribe_validates_required_fields() {
        let (state, _) = test_state(RecordingTransport::default());
        let router = router(state);

        let missing_auth = json!({"endpoint": "https://push/a", "keys": {"p256dh": "BPk3"}});
        let (status, body) =
            call(&router, Method::POST, "/api/push/subscribe", None, Some(missing_auth)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], INVALID_SUBSCRIPTION);

        let (status, _) =
            call(&router, Method::POST, "/api/push/subscribe", None, Some(json!("nope"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_round_trips_through_the_store() {
        let (state, _) = test_state(RecordingTransport::default());
        let store = state.store.clone();
        let router = router(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/push/subscribe",
            None,
            Some(subscription_json("https://push/a")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(store.list_endpoints().await.unwrap(), vec!["https://push/a"]);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/push/unsubscribe",
            None,
            Some(json!({"endpoint": "https://push/a"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.list_endpoints().await.unwrap().is_empty());

        let (status, _) =
            call(&router, Method::POST, "/api/push/unsubscribe", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_requires_the_bearer_secret() {
        let (state, _) = test_state(RecordingTransport::default());
        let router = router(state);

        let (status, _) = call(&router, Method::GET, "/api/push/send", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&router, Method::GET, "/api/push/send", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn send_dispatches_once_per_slot() {
        let (state, transport) = test_state(RecordingTransport::default());
        state.store.add(&subscription("https://push/a")).await.unwrap();
        let router = router(state);

        let (status, body) =
            call(&router, Method::GET, "/api/push/send?slot=evening", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["slot"], "evening");
        assert_eq!(body["sent"], 1);
        assert!(body.get("skipped").is_none());

        let (_, again) =
            call(&router, Method::GET, "/api/push/send?slot=evening", Some(SECRET), None).await;
        assert_eq!(again["skipped"], true);
        assert_eq!(again["sent"], 0);
        assert_eq!(transport.delivered().len(), 1);

        let (_, default_slot) =
            call(&router, Method::POST, "/api/push/send?slot=bogus", Some(SECRET), None).await;
        assert_eq!(default_slot["slot"], "morning");
    }

    #[tokio::test]
    async fn test_endpoint_reports_upstream_failures() {
        let (state, transport) = test_state(RecordingTransport::failing(&[(
            "https://push/flaky",
            Outcome::Transient,
        )]));
        let router = router(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/push/test",
            Some(SECRET),
            Some(subscription_json("https://push/a")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["title"].is_string());
        assert_eq!(transport.delivered().len(), 1);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/push/test",
            Some(SECRET),
            Some(subscription_json("https://push/flaky")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn debug_and_clear_all_reflect_store_state() {
        let (state, _) = test_state(RecordingTransport::default());
        let long_endpoint = format!("https://push.example/{}", "x".repeat(80));
        state.store.add(&subscription(&long_endpoint)).await.unwrap();
        let router = router(state);

        let (status, body) = call(&router, Method::GET, "/api/push/debug", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscriptions"]["count"], 1);
        let shown = body["subscriptions"]["endpoints"][0].as_str().unwrap();
        assert_eq!(shown.len(), 53);
        assert_eq!(body["config"]["hasCronSecret"], true);
        assert_eq!(body["config"]["hasVapidPrivate"], true);
        let today_info = body["todayInfo"].as_object().unwrap();
        assert!(!today_info.contains_key("date"));
        for field in ["cycleDay", "special", "label"] {
            assert!(today_info.contains_key(field), "missing {field}");
        }
        assert!(!body.to_string().contains("private-key-material"));

        let (status, cleared) =
            call(&router, Method::POST, "/api/push/clear-all", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["cleared"], 1);
    }

    #[tokio::test]
    async fn public_key_is_exposed_but_private_key_is_not() {
        let (state, _) = test_state(RecordingTransport::default());
        let router = router(state);

        let (status, body) = call(&router, Method::GET, "/api/push/public-key", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"publicKey": "BPublicKey"}));
    }

    #[tokio::test]
    async fn serves_calendar_and_subscriptions_without_push_keys() {
        let state = state_without_push();
        let store = state.store.clone();
        let router = router(state);

        let (status, _) = call(&router, Method::GET, "/api/today", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/push/subscribe",
            None,
            Some(subscription_json("https://push/a")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.list_endpoints().await.unwrap(), vec!["https://push/a"]);

        let (status, _) = call(&router, Method::GET, "/api/push/public-key", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = call(&router, Method::GET, "/api/push/send", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = call(
            &router,
            Method::POST,
            "/api/push/test",
            Some(SECRET),
            Some(subscription_json("https://push/a")),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(&router, Method::GET, "/api/push/debug", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["hasVapidPrivate"], false);
        assert_eq!(body["config"]["hasVapidPublic"], false);
    }
}
