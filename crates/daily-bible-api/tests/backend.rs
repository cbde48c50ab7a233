//! Backend clients against a mock PostgREST server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use daily_bible_api::{
    ApiConfig, ApiError, ContentClient, EntryId, HttpNetwork, PermissionState, PushManager,
    PushSubscription,
    RestClient, SubscribeState, SubscriptionClient, SubscriptionKeys, SubscriptionManager,
};
use daily_bible_sw::{
    EventOutcome, FetchRequest, MemoryCacheStorage, MemoryClients, MemoryNotifier,
    ServiceWorkerGlobalScope, WorkerConfig, WorkerEvent, WorkerHost,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON_KEY: &str = "anon-test-key";

fn rest(server: &MockServer) -> RestClient {
    RestClient::new(ApiConfig::new(&server.uri(), ANON_KEY).unwrap()).unwrap()
}

fn subscription() -> PushSubscription {
    PushSubscription {
        endpoint: "https://push.example/send/abc".into(),
        expiration_time: None,
        keys: SubscriptionKeys {
            p256dh: "BNcR".into(),
            auth: "tBHI".into(),
        },
    }
}

#[tokio::test]
async fn latest_requests_newest_page_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/daily_bible"))
        .and(query_param("order", "date.desc"))
        .and(query_param("limit", "14"))
        .and(header("apikey", ANON_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 2,
                "date": "2026-10-19",
                "verse_reference": "約翰福音 3:16",
                "verse_text": "神愛世人",
                "exposition": "...",
                "audio_url": "https://cdn.example/2.mp3",
                "view_count": 41,
                "play_count": 7
            },
            {
                "id": 1,
                "date": "2026-10-18",
                "verse_reference": "詩篇 23:1",
                "verse_text": "耶和華是我的牧者",
                "exposition": "..."
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let entries = ContentClient::new(rest(&server)).latest().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, EntryId::Int(2));
    assert_eq!(entries[0].views(), 41);
    assert_eq!(entries[1].audio_url, None);
}

#[tokio::test]
async fn latest_surfaces_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/daily_bible"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = ContentClient::new(rest(&server)).latest().await;
    assert!(matches!(result, Err(ApiError::Status { status: 503, .. })));
}

#[tokio::test]
async fn stats_sums_counters_and_counts_subscribers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/daily_bible"))
        .and(query_param("select", "view_count,play_count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"view_count": 1200, "play_count": 3},
            {"view_count": null, "play_count": 4},
            {"view_count": 5, "play_count": null}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/push_subscribers"))
        .and(query_param("select", "id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
        .mount(&server)
        .await;

    let stats = ContentClient::new(rest(&server)).stats().await.unwrap();
    assert_eq!(stats.total_views, 1205);
    assert_eq!(stats.total_plays, 7);
    assert_eq!(stats.total_subscribers, Some(2));
}

#[tokio::test]
async fn stats_tolerates_unreadable_subscriber_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/daily_bible"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"view_count": 9}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/push_subscribers"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let stats = ContentClient::new(rest(&server)).stats().await.unwrap();
    assert_eq!(stats.total_views, 9);
    assert_eq!(stats.total_subscribers, None);
}

#[tokio::test]
async fn counters_post_row_id_to_rpc() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/increment_view"))
        .and(body_json(json!({"row_id": 2})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/increment_play"))
        .and(body_json(json!({"row_id": "abc"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = ContentClient::new(rest(&server));
    client.record_view(EntryId::Int(2)).await.unwrap();
    client.increment_play(&EntryId::Text("abc".into())).await.unwrap();
}

#[tokio::test]
async fn background_counter_failure_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/increment_play"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = ContentClient::new(rest(&server));
    assert!(client.record_play(EntryId::Int(1)).await.is_ok());
}

#[tokio::test]
async fn save_subscription_wraps_payload_and_asks_for_minimal_return() {
    let server = MockServer::start().await;
    let sub = subscription();
    Mock::given(method("POST"))
        .and(path("/rest/v1/push_subscribers"))
        .and(header("apikey", ANON_KEY))
        .and(header("Prefer", "return=minimal"))
        .and(body_json(json!({
            "subscription": {
                "endpoint": "https://push.example/send/abc",
                "expirationTime": null,
                "keys": {"p256dh": "BNcR", "auth": "tBHI"}
            }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut manager = SubscriptionManager::new(
        SubscriptionClient::new(rest(&server)),
        SubscribeState::initial(true, false),
    );
    let state = manager.subscribe(PermissionState::Granted, &sub).await.unwrap();
    assert_eq!(state, SubscribeState::Subscribed);
    assert_eq!(manager.unsubscribe(), SubscribeState::Default);
}

#[tokio::test]
async fn failed_save_restores_settled_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/push_subscribers"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let mut manager =
        SubscriptionManager::new(SubscriptionClient::new(rest(&server)), SubscribeState::Default);
    let result = manager.subscribe(PermissionState::Granted, &subscription()).await;
    assert!(matches!(result, Err(ApiError::Status { status: 409, .. })));
    assert_eq!(manager.state(), SubscribeState::Default);

    let denied = manager.subscribe(PermissionState::Denied, &subscription()).await;
    assert!(matches!(denied, Err(ApiError::PermissionDenied)));
    assert_eq!(manager.state(), SubscribeState::Default);

    let mut subscribed =
        SubscriptionManager::new(SubscriptionClient::new(rest(&server)), SubscribeState::Subscribed);
    let retry = subscribed.subscribe(PermissionState::Granted, &subscription()).await;
    assert!(retry.is_err());
    assert_eq!(subscribed.state(), SubscribeState::Subscribed);
}

/// Hands out `subscription()` and remembers the key it was asked to bind.
#[derive(Default)]
struct RecordingPushManager {
    keys: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl PushManager for RecordingPushManager {
    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription, ApiError> {
        self.keys.lock().unwrap().push(application_server_key.to_vec());
        Ok(subscription())
    }
}

#[tokio::test]
async fn subscribe_binds_vapid_key_then_saves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/push_subscribers"))
        .and(body_json(json!({
            "subscription": {
                "endpoint": "https://push.example/send/abc",
                "expirationTime": null,
                "keys": {"p256dh": "BNcR", "auth": "tBHI"}
            }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig::new(&server.uri(), ANON_KEY)
        .unwrap()
        .with_vapid_public_key("BAEC=");
    let client = SubscriptionClient::new(RestClient::new(config).unwrap());
    let mut manager = SubscriptionManager::new(client, SubscribeState::Default);
    let push = RecordingPushManager::default();

    let state = manager.subscribe_with(PermissionState::Granted, &push).await.unwrap();
    assert_eq!(state, SubscribeState::Subscribed);
    assert_eq!(*push.keys.lock().unwrap(), vec![vec![4u8, 1, 2]]);
}

#[tokio::test]
async fn subscribe_without_vapid_key_never_reaches_push_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/push_subscribers"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let mut manager =
        SubscriptionManager::new(SubscriptionClient::new(rest(&server)), SubscribeState::Default);
    let push = RecordingPushManager::default();

    let result = manager.subscribe_with(PermissionState::Granted, &push).await;
    assert!(matches!(result, Err(ApiError::MissingConfig("VAPID_PUBLIC_KEY"))));
    assert!(push.keys.lock().unwrap().is_empty());
    assert_eq!(manager.state(), SubscribeState::Default);
}

#[tokio::test]
async fn http_network_feeds_the_worker_and_cache_covers_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<h1>每日靈修</h1>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let origin = Url::parse(&format!("{}/", server.uri())).unwrap();
    let config = WorkerConfig::default()
        .with_origin(origin.clone())
        .with_precache(&["/index.html"]);
    let host = WorkerHost::new(
        Arc::new(MemoryCacheStorage::new()),
        Arc::new(HttpNetwork::new(Duration::from_millis(500)).unwrap()),
        Arc::new(MemoryClients::new()),
        Arc::new(MemoryNotifier::new()),
    );
    let worker = ServiceWorkerGlobalScope::new(Arc::new(config), host);

    let installed = worker.handle(WorkerEvent::Install).await.unwrap();
    assert!(matches!(installed, EventOutcome::Installed(ref o) if o.precached == 1));

    let request = FetchRequest::get(origin.join("/index.html").unwrap());
    let EventOutcome::Responded(online) =
        worker.handle(WorkerEvent::Fetch(request.clone())).await.unwrap()
    else {
        panic!("expected a response");
    };
    assert!(!online.from_cache);
    assert_eq!(online.headers.get("content-type").map(String::as_str), Some("text/html"));

    // A 404 is a response, not a network failure.
    let EventOutcome::Responded(missing) = worker
        .handle(WorkerEvent::Fetch(FetchRequest::get(origin.join("/missing.png").unwrap())))
        .await
        .unwrap()
    else {
        panic!("expected a response");
    };
    assert_eq!(missing.status, 404);

    // Slower than the client timeout: the origin is effectively down.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let EventOutcome::Responded(offline) =
        worker.handle(WorkerEvent::Fetch(request)).await.unwrap()
    else {
        panic!("expected a response");
    };
    assert!(offline.from_cache);
    assert_eq!(offline.body, "<h1>每日靈修</h1>".as_bytes());
}
