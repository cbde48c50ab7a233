//! Daily Bible Smoke Harness
//!
//! Registers the worker against in-memory hosts and walks it through one
//! full lifecycle: install, activate, online and offline fetches, push
//! delivery and a notification click. With `--live` the network seam is real
//! HTTP and the feed is read from the configured backend.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use daily_bible_api::{format_count, ApiConfig, ContentClient, HttpNetwork, RestClient};
use daily_bible_common::{init_logging, AppError, LogConfig};
use daily_bible_sw::{
    Client, ClientHost, ClientMatchOptions, EventOutcome, FetchRequest, FetchResponse,
    MemoryCacheStorage, MemoryClients, MemoryNotifier, Network, NotificationClickEvent, Notifier,
    PushEvent, RegisterOutcome, ServiceWorkerContainer, StaticNetwork, WorkerConfig, WorkerEvent,
    WorkerHost,
};
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

const SCRIPT: &str = "self.addEventListener('install', () => self.skipWaiting());";

/// Performance timing collector for tracking operation durations.
struct PerfTiming {
    timings: RefCell<HashMap<&'static str, Vec<Duration>>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: RefCell::new(HashMap::new()),
        }
    }

    fn record(&self, operation: &'static str, duration: Duration) {
        self.timings
            .borrow_mut()
            .entry(operation)
            .or_default()
            .push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let round = |ms: f64| (ms * 100.0).round() / 100.0;
        let mut summary = serde_json::Map::new();

        for (op, durations) in self.timings.borrow().iter() {
            if durations.is_empty() {
                continue;
            }
            let ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let total_ms: f64 = ms.iter().sum();
            summary.insert(
                op.to_string(),
                json!({
                    "count": ms.len(),
                    "total_ms": round(total_ms),
                    "avg_ms": round(total_ms / ms.len() as f64),
                    "min_ms": round(ms.iter().copied().fold(f64::INFINITY, f64::min)),
                    "max_ms": round(ms.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

#[derive(Parser, Debug)]
#[command(name = "daily-bible-smoke")]
#[command(about = "Scripted run of the Daily Bible service worker lifecycle")]
#[command(version)]
struct Args {
    /// Worker configuration as JSON; defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Origin the app is served from
    #[arg(long, default_value = "https://localhost/")]
    origin: String,

    /// Use real HTTP and read the feed from SUPABASE_URL
    #[arg(long)]
    live: bool,

    /// Write the timing summary to this file
    #[arg(long)]
    perf_output: Option<String>,
}

/// Time one async step under `name`.
async fn timed<T>(
    perf: &PerfTiming,
    name: &'static str,
    fut: impl std::future::Future<Output = T>,
) -> T {
    let start = Instant::now();
    let out = fut.await;
    perf.record(name, start.elapsed());
    out
}

fn load_config(args: &Args) -> anyhow::Result<WorkerConfig> {
    let origin = Url::parse(&args.origin).context("invalid --origin")?;
    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path))?;
            WorkerConfig::from_json(&json)?
        }
        None => WorkerConfig::default().with_origin(origin),
    };
    config.validate()?;
    Ok(config)
}

/// Log a failed step with its error category and note it for the summary.
fn record_failure(failures: &mut Vec<String>, step: &str, err: impl Into<AppError>) {
    let err = err.into();
    warn!(
        step,
        category = err.category(),
        transient = err.is_transient(),
        error = %err,
        "Smoke step failed"
    );
    failures.push(format!("{} failed: {}", step, err));
}

/// Canned responses for `/` and every precached asset.
fn offline_routes(config: &WorkerConfig) -> anyhow::Result<StaticNetwork> {
    let mut network = StaticNetwork::new().with_route(
        config.resolve("/")?.as_str(),
        FetchResponse::ok("<!doctype html><title>每日靈修</title>")
            .with_header("content-type", "text/html"),
    );
    for asset in &config.precache_assets {
        let url = config.resolve(asset)?;
        network = network.with_route(url.as_str(), FetchResponse::ok(format!("asset {}", asset)));
    }
    Ok(network)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig::from_env())?;

    let config = load_config(&args)?;
    let perf = PerfTiming::new();
    let start = Instant::now();
    let mut failures: Vec<String> = Vec::new();

    info!(
        origin = %config.origin()?,
        cache = %config.cache_name,
        live = args.live,
        "Smoke run starting"
    );

    let offline = if args.live {
        None
    } else {
        Some(Arc::new(offline_routes(&config)?))
    };
    let network: Arc<dyn Network> = match &offline {
        Some(network) => network.clone() as Arc<dyn Network>,
        None => Arc::new(HttpNetwork::new(Duration::from_secs(10))?),
    };

    let clients = Arc::new(MemoryClients::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let host = WorkerHost::new(
        Arc::new(MemoryCacheStorage::new()),
        network,
        clients.clone(),
        notifier.clone(),
    );

    let script_url = config.resolve("/sw.js")?;
    let scope = config.resolve("/")?.to_string();
    let page = config.resolve("/")?;
    let (container, mut events) = ServiceWorkerContainer::new(host);
    clients.add(Client::window("page-1", page.clone())).await;

    // Register, then re-register the identical script.
    let script_url = script_url.as_str();
    let first = timed(
        &perf,
        "register",
        container.register(script_url, SCRIPT, config.clone()),
    )
    .await?;
    let again = timed(
        &perf,
        "register",
        container.register(script_url, SCRIPT, config.clone()),
    )
    .await?;
    if !matches!(again, RegisterOutcome::Unchanged(_)) {
        failures.push(format!("re-registration was not a no-op: {:?}", again));
    }
    info!(?first, ?again, "Registration complete");

    let request = FetchRequest::get(page.clone()).navigation();
    let online = container.dispatch(&scope, WorkerEvent::Fetch(request.clone()));
    match timed(&perf, "fetch", online).await {
        Ok(EventOutcome::Responded(response)) => {
            info!(status = response.status, from_cache = response.from_cache, "Online fetch")
        }
        Ok(other) => failures.push(format!("unexpected fetch outcome: {:?}", other)),
        Err(e) => record_failure(&mut failures, "online fetch", e),
    }

    if let Some(network) = &offline {
        network.set_online(false);
        let outage = container.dispatch(&scope, WorkerEvent::Fetch(request));
        match timed(&perf, "fetch_offline", outage).await {
            Ok(EventOutcome::Responded(response)) if response.from_cache => {
                info!(status = response.status, "Offline fetch served from cache")
            }
            Ok(other) => failures.push(format!("offline fetch not from cache: {:?}", other)),
            Err(e) if !config.precache_enabled => {
                warn!(error = %e, "Offline fetch failed with precaching disabled")
            }
            Err(e) => record_failure(&mut failures, "offline fetch", e),
        }
        network.set_online(true);
    }

    let payload = json!({
        "title": "📖 今日經文",
        "body": "詩篇 23:1",
        "url": "/?entry=today"
    });
    for data in [payload.to_string().into_bytes(), b"not json".to_vec()] {
        let push = container.dispatch(&scope, WorkerEvent::Push(PushEvent::new(data)));
        if let Err(e) = timed(&perf, "push", push).await {
            record_failure(&mut failures, "push", e);
        }
    }

    let shown = notifier.get_notifications().await;
    info!(count = shown.len(), "Notifications displayed");
    if let Some(notification) = shown.into_iter().next() {
        let click = WorkerEvent::NotificationClick(NotificationClickEvent {
            notification,
            action: Some("open".to_string()),
        });
        match timed(&perf, "notification_click", container.dispatch(&scope, click)).await {
            Ok(EventOutcome::ClientFocused(client)) => info!(client = %client.id, "Focused window"),
            Ok(EventOutcome::WindowOpened(client)) => info!(url = %client.url, "Opened window"),
            Ok(other) => failures.push(format!("unexpected click outcome: {:?}", other)),
            Err(e) => record_failure(&mut failures, "notification click", e),
        }
    } else {
        failures.push("no notification was displayed".to_string());
    }

    let mut feed = serde_json::Value::Null;
    if args.live {
        let rest = ApiConfig::from_env()
            .and_then(RestClient::new)
            .map_err(AppError::from)?;
        let content = ContentClient::new(rest);
        let entries = timed(&perf, "feed", content.latest())
            .await
            .map_err(AppError::from)?;
        let stats = timed(&perf, "stats", content.stats())
            .await
            .map_err(AppError::from)?;
        feed = json!({
            "entries": entries.len(),
            "newest": entries.first().map(|e| e.date.to_string()),
            "views": format_count(stats.total_views),
            "plays": format_count(stats.total_plays),
            "subscribers": stats.total_subscribers,
        });
    }

    let mut container_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        container_events.push(format!("{:?}", event));
    }
    let all = ClientMatchOptions {
        include_uncontrolled: true,
        ..Default::default()
    };
    let open_windows = clients.match_all(&all).await.len();

    let status = if failures.is_empty() { "pass" } else { "fail" };
    let result = json!({
        "status": status,
        "elapsed_ms": start.elapsed().as_millis(),
        "failures": failures,
        "container_events": container_events,
        "open_windows": open_windows,
        "feed": feed,
        "perf": perf.summary()
    });

    if let Some(ref perf_path) = args.perf_output {
        let written = std::fs::write(perf_path, result["perf"].to_string());
        if let Err(e) = written.map_err(AppError::from) {
            error!(category = e.category(), error = %e, "Failed to write perf output");
        } else {
            info!(?perf_path, "Perf summary written");
        }
    }

    println!("{}", result);
    if status != "pass" {
        bail!("smoke run failed");
    }
    Ok(())
}
