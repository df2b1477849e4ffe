//! End-to-end lifecycle tests: init, refresh failures, hot swap, HTTP.

use ipgeo::api::{router, AppState, BaseResponse, GeoResponse, HEALTHZ_PATH, LOOKUP_PATH};
use ipgeo::binary::{decode, DatabaseWriter};
use ipgeo::refresh::{RefreshOutcome, VERSION_FORMAT};
use ipgeo::{DataSyncConfig, Error, ErrorKind, Fetcher, GeoDatabase, GeoService, Result, Trigger};
use parking_lot::Mutex;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// In-memory source whose payload can be swapped or withdrawn.
#[derive(Clone, Default)]
struct Upstream {
    body: Arc<Mutex<Option<Vec<u8>>>>,
    calls: Arc<AtomicUsize>,
}

impl Upstream {
    fn serving(body: Vec<u8>) -> Self {
        let upstream = Self::default();
        upstream.set(Some(body));
        upstream
    }

    fn set(&self, body: Option<Vec<u8>>) {
        *self.body.lock() = body;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for Upstream {
    fn fetch(&self, dest: &mut dyn Write) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.body.lock() {
            Some(body) => {
                dest.write_all(body)?;
                Ok(body.len() as u64)
            }
            None => Err(Error::Remote("upstream unavailable".to_string())),
        }
    }

    fn location(&self) -> &str {
        "memory://upstream"
    }
}

/// Upstream answering with a JSON error document.
struct JsonError;

impl Fetcher for JsonError {
    fn fetch(&self, _dest: &mut dyn Write) -> Result<u64> {
        Err(Error::RemotePayload {
            url: "memory://json".to_string(),
            body: r#"{"code":10001,"msg":"quota exceeded"}"#.to_string(),
        })
    }

    fn location(&self) -> &str {
        "memory://json"
    }
}

/// Upstream whose transport blows up mid-transfer.
struct Exploding;

impl Fetcher for Exploding {
    fn fetch(&self, dest: &mut dyn Write) -> Result<u64> {
        dest.write_all(b"PK\x03\x04")?;
        panic!("tls session poisoned");
    }

    fn location(&self) -> &str {
        "memory://exploding"
    }
}

fn record(country: &str, isp: &str) -> String {
    format!(
        "亚洲|{}|省|市||{}|000000|CC|1.0|2.0|000000|1|{}.example|||Asia/Shanghai",
        country, isp, isp
    )
}

/// Three ranges around 10.0.0.0/8, the block holding the validation address.
/// With `valid_at_10` false that block carries a truncated record.
fn writer(country: &str, isp: &str, valid_at_10: bool) -> DatabaseWriter {
    let full = record(country, isp);
    let block_10 = if valid_at_10 { full.as_str() } else { "保留地址|" };
    let mut w = DatabaseWriter::new();
    w.add_range(Ipv4Addr::new(0, 0, 0, 0), Ipv4Addr::new(9, 255, 255, 255), &full)
        .unwrap();
    w.add_range(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 255, 255, 255), block_10)
        .unwrap();
    w.add_range(Ipv4Addr::new(11, 0, 0, 0), Ipv4Addr::new(255, 255, 255, 255), &full)
        .unwrap();
    w
}

fn zipped(country: &str, isp: &str, valid_at_10: bool) -> Vec<u8> {
    writer(country, isp, valid_at_10)
        .write_zip("ipdata.dat")
        .unwrap()
}

fn config() -> DataSyncConfig {
    DataSyncConfig::new("memory://upstream")
}

fn service(upstream: &Upstream) -> GeoService {
    GeoService::with_fetcher(&config(), Box::new(upstream.clone())).unwrap()
}

fn current_digest(db: &GeoDatabase) -> String {
    db.current().unwrap().digest().to_string()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_init_then_lookup() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service = service(&upstream);

    assert!(!service.is_ready());
    assert_eq!(service.lookup("8.8.8.8").unwrap_err().kind(), ErrorKind::NotReady);

    service.init().unwrap();
    assert!(service.is_ready());

    let info = service.lookup("8.8.8.8").unwrap();
    let today = chrono::Utc::now().format(VERSION_FORMAT).to_string();
    assert_eq!(info.db_version, today);
    assert_eq!(info.continent_code, "AP");
    assert_eq!(info.record.isp, "联通");
    assert_eq!(upstream.calls(), 1);

    service.shutdown();
}

#[test]
fn test_init_fails_after_two_download_failures() {
    let upstream = Upstream::default();
    let service = service(&upstream);

    let err = service.init().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteError);
    assert_eq!(upstream.calls(), 2);
    assert!(!service.is_ready());
    assert_eq!(service.lookup("8.8.8.8").unwrap_err().kind(), ErrorKind::NotReady);
}

#[test]
fn test_json_error_payload_fails_init() {
    let service = GeoService::with_fetcher(&config(), Box::new(JsonError)).unwrap();
    match service.init().unwrap_err() {
        Error::RemotePayload { body, .. } => assert!(body.contains("quota exceeded")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_panicking_download_fails_init() {
    let service = GeoService::with_fetcher(&config(), Box::new(Exploding)).unwrap();
    let err = service.init().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalFault);
    assert!(err.to_string().contains("tls session poisoned"));
    assert!(!service.is_ready());
    assert_eq!(
        service.refresher().state(),
        ipgeo::refresh::CycleState::Idle
    );
}

#[test]
fn test_short_test_interval_rejected() {
    let mut c = config();
    c.for_test = true;
    c.refresh_interval_secs = 3;
    let err = GeoService::with_fetcher(&c, Box::new(Upstream::default()))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

// ============================================================================
// Refresh failures leave the served snapshot alone
// ============================================================================

#[test]
fn test_failed_download_keeps_snapshot() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service = service(&upstream);
    service.init().unwrap();
    let before = current_digest(service.database());

    upstream.set(None);
    let err = service.refresher().refresh().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteError);

    assert_eq!(current_digest(service.database()), before);
    assert_eq!(service.database().generation(), 1);
    assert!(service.is_ready());
    assert_eq!(service.lookup("1.2.3.4").unwrap().record.isp, "联通");
}

#[test]
fn test_validation_failure_keeps_snapshot() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service = service(&upstream);
    service.init().unwrap();
    let before = current_digest(service.database());

    // New data decodes, but 10.0.0.1 resolves to a truncated record.
    upstream.set(Some(zipped("中国", "电信", false)));
    let err = service.refresher().refresh().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FormatError);

    assert_eq!(current_digest(service.database()), before);
    assert_eq!(service.lookup("1.2.3.4").unwrap().record.isp, "联通");
}

#[test]
fn test_corrupt_archive_keeps_snapshot() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service = service(&upstream);
    service.init().unwrap();
    let before = current_digest(service.database());

    let mut truncated = writer("日本", "NTT", true).write().unwrap();
    truncated.truncate(truncated.len() - 4);
    upstream.set(Some(ipgeo::binary::zip_single("ipdata.dat", &truncated).unwrap()));

    assert!(service.refresher().refresh().is_err());
    assert_eq!(current_digest(service.database()), before);
}

#[test]
fn test_successful_refresh_replaces_snapshot() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service = service(&upstream);
    service.init().unwrap();

    upstream.set(Some(zipped("日本", "NTT", true)));
    let outcome = service.refresher().refresh().unwrap();
    assert!(matches!(outcome, RefreshOutcome::Published { .. }));
    assert_eq!(service.database().generation(), 2);
    assert_eq!(service.lookup("1.2.3.4").unwrap().record.country, "日本");
}

#[test]
fn test_scheduled_refresh() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service =
        service(&upstream).with_trigger(Trigger::Interval(Duration::from_millis(20)));
    service.init().unwrap();

    upstream.set(Some(zipped("日本", "NTT", true)));
    let deadline = Instant::now() + Duration::from_secs(10);
    let country = || service.lookup("1.2.3.4").unwrap().record.country;
    while country() != "日本" && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(service.lookup("1.2.3.4").unwrap().record.country, "日本");

    // Later failures do not affect readiness.
    upstream.set(None);
    thread::sleep(Duration::from_millis(100));
    assert!(service.is_ready());
    assert_eq!(service.lookup("1.2.3.4").unwrap().record.country, "日本");

    service.shutdown();
}

// ============================================================================
// Hot swap consistency
// ============================================================================

#[test]
fn test_concurrent_lookups_during_publish() {
    let a = writer("甲", "甲网", true).write().unwrap();
    let b = writer("乙", "乙网", true).write().unwrap();
    let db = Arc::new(GeoDatabase::from_snapshot(decode(a.clone(), "a").unwrap()));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let info = db.lookup("100.64.1.1").unwrap();
                    // Version, country and ISP must come from one snapshot.
                    let seen_pair = (info.record.country.as_str(), info.record.isp.as_str());
                    match info.db_version.as_str() {
                        "a" => assert_eq!(seen_pair, ("甲", "甲网")),
                        "b" => assert_eq!(seen_pair, ("乙", "乙网")),
                        other => panic!("unexpected version {}", other),
                    }
                    seen += 1;
                }
                seen
            })
        })
        .collect();

    for i in 0..200 {
        let (data, version) = if i % 2 == 0 { (&b, "b") } else { (&a, "a") };
        let mut buffers = db.take_standby();
        let pool = buffers.pool_mut();
        pool.clear();
        pool.extend_from_slice(data);
        db.publish(ipgeo::binary::decode_with(buffers, version).unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(db.generation(), 201);
}

// ============================================================================
// HTTP front end
// ============================================================================

/// `Access-Control-Allow-Origin` answered to a cross-origin request.
fn allowed_origin(method: &str, url: String) -> Option<String> {
    let resp = match ureq::request(method, &url)
        .set("Origin", "https://console.example.com")
        .set("Access-Control-Request-Method", "GET")
        .call()
    {
        Ok(resp) => resp,
        Err(ureq::Error::Status(_, resp)) => resp,
        Err(e) => panic!("request failed: {}", e),
    };
    resp.header("access-control-allow-origin").map(str::to_string)
}

fn get(url: String) -> (u16, String) {
    match ureq::get(&url).call() {
        Ok(resp) => (resp.status(), resp.into_string().unwrap()),
        Err(ureq::Error::Status(code, resp)) => (code, resp.into_string().unwrap()),
        Err(e) => panic!("request failed: {}", e),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_endpoints() {
    let upstream = Upstream::serving(zipped("中国", "联通", true));
    let service = Arc::new(service(&upstream));
    let app = router(AppState {
        service: Arc::clone(&service),
        rate_limit: None,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    let base = format!("http://{}", addr);

    let b = base.clone();
    let (status, _) = tokio::task::spawn_blocking(move || get(format!("{}{}", b, HEALTHZ_PATH)))
        .await
        .unwrap();
    assert_eq!(status, 503);

    let b = base.clone();
    let (status, _) = tokio::task::spawn_blocking(move || {
        get(format!("{}{}?ip_addr=8.8.8.8", b, LOOKUP_PATH))
    })
    .await
    .unwrap();
    assert_eq!(status, 503);

    let s = Arc::clone(&service);
    tokio::task::spawn_blocking(move || s.init()).await.unwrap().unwrap();

    let b = base.clone();
    let results = tokio::task::spawn_blocking(move || {
        vec![
            get(format!("{}{}", b, HEALTHZ_PATH)),
            get(format!("{}{}?ip_addr=8.8.8.8", b, LOOKUP_PATH)),
            get(format!("{}{}?ip_addr=8.8.8", b, LOOKUP_PATH)),
            get(format!("{}{}", b, LOOKUP_PATH)),
        ]
    })
    .await
    .unwrap();

    assert_eq!(results[0].0, 200);

    assert_eq!(results[1].0, 200);
    let body: BaseResponse<GeoResponse> = serde_json::from_str(&results[1].1).unwrap();
    assert_eq!(body.code, 0);
    let geo = body.data.unwrap();
    assert_eq!(geo.country, "中国");
    assert_eq!(geo.isp, "联通");
    assert_eq!(geo.isp_domain, "联通.example");
    assert_eq!(geo.district, "");

    assert_eq!(results[2].0, 400);
    // Missing query parameter is rejected by the extractor.
    assert_eq!(results[3].0, 400);

    let b = base.clone();
    let origins = tokio::task::spawn_blocking(move || {
        vec![
            allowed_origin("GET", format!("{}{}?ip_addr=8.8.8.8", b, LOOKUP_PATH)),
            allowed_origin("OPTIONS", format!("{}{}", b, LOOKUP_PATH)),
        ]
    })
    .await
    .unwrap();
    assert_eq!(origins, vec![Some("*".to_string()), Some("*".to_string())]);

    service.shutdown();
}
