//! Engine-level integration tests driving [`PasteEngine`] through an
//! in-memory transport plugin shared by all "devices" in the test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::sleep;

use pastebridge::config::Config;
use pastebridge::devices::StaticRoster;
use pastebridge::event::{ClipEvent, EventStatus, UserId};
use pastebridge::record::{EntryValue, PasteData, PasteRecord};
use pastebridge::sync::SyncError;
use pastebridge::transport::{ClipPlugin, PluginError};
use pastebridge::PasteEngine;

const STATUS_NOT_FOUND: i32 = 404;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Transport backed by shared in-memory maps; every engine attached to the
/// same instance sees the same published events and payloads.
#[derive(Default)]
struct MemoryPlugin {
    events: Mutex<Vec<ClipEvent>>,
    payloads: Mutex<HashMap<(String, u64), Bytes>>,
    record_values: Mutex<HashMap<(u32, String), EntryValue>>,
    fetch_delay: Duration,
    delay_fetch: bool,
    fetches: AtomicUsize,
    record_fetches: AtomicUsize,
}

impl MemoryPlugin {
    fn new() -> Self {
        Self::default()
    }

    fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: delay,
            ..Self::default()
        }
    }

    fn with_delay_records(mut self) -> Self {
        self.delay_fetch = true;
        self
    }

    async fn publish(&self, event: &ClipEvent, data: &PasteData) {
        let raw = data.to_bytes().expect("serializable payload");
        self.publish_raw(event, raw).await;
    }

    async fn publish_raw(&self, event: &ClipEvent, raw: Bytes) {
        self.payloads
            .lock()
            .await
            .insert((event.device_id.clone(), event.seq_id), raw);
        let mut events = self.events.lock().await;
        events.retain(|e| !e.same_source(event));
        events.insert(0, event.clone());
    }

    async fn put_record_value(&self, record_id: u32, mime: &str, value: EntryValue) {
        self.record_values
            .lock()
            .await
            .insert((record_id, mime.to_string()), value);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn record_fetches(&self) -> usize {
        self.record_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipPlugin for MemoryPlugin {
    async fn get_top_events(
        &self,
        top_n: usize,
        user: UserId,
    ) -> Result<Vec<ClipEvent>, PluginError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|e| e.user == user)
            .take(top_n)
            .cloned()
            .collect())
    }

    async fn get_paste_data(&self, event: &ClipEvent) -> Result<Bytes, PluginError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            sleep(self.fetch_delay).await;
        }
        let payloads = self.payloads.lock().await;
        payloads
            .get(&(event.device_id.clone(), event.seq_id))
            .cloned()
            .ok_or(PluginError::Status(STATUS_NOT_FOUND))
    }

    async fn set_paste_data(&self, event: &ClipEvent, payload: Bytes) -> Result<(), PluginError> {
        self.publish_raw(event, payload).await;
        Ok(())
    }

    fn supports_delay_fetch(&self) -> bool {
        self.delay_fetch
    }

    async fn get_record_value(
        &self,
        _event: &ClipEvent,
        record_id: u32,
        mime: &str,
    ) -> Result<EntryValue, PluginError> {
        self.record_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            sleep(self.fetch_delay).await;
        }
        let values = self.record_values.lock().await;
        values
            .get(&(record_id, mime.to_string()))
            .cloned()
            .ok_or_else(|| PluginError::Other(format!("no value for record {record_id}")))
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.device.device_id = "local".into();
    config.device.device_name = "local-host".into();
    config.device.account = "acct".into();
    config
}

async fn engine_with(plugin: Arc<MemoryPlugin>, config: Config) -> PasteEngine {
    let roster = Arc::new(StaticRoster::new());
    roster.add("phone", "Phone").await;
    roster.add("local", "local-host").await;
    let engine = PasteEngine::new(&config, roster);
    engine.attach_plugin(plugin).await;
    engine
}

fn remote_event(user: UserId, seq: u64) -> ClipEvent {
    let mut event = ClipEvent::new(user, seq, "phone", "acct");
    event.status = EventStatus::Normal;
    event.expiration = now_ms() + 60_000;
    event.data_id = seq;
    event.data_types = vec!["text/plain".into()];
    event
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pastes_share_one_fetch() {
    let plugin = Arc::new(MemoryPlugin::with_fetch_delay(Duration::from_millis(500)));
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("from phone")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;

    let mut callers = Vec::new();
    for _ in 0..3 {
        let engine = engine.clone();
        callers.push(tokio::spawn(async move { engine.get_paste_data(5).await }));
    }

    let mut payloads = Vec::new();
    for caller in callers {
        let response = caller.await.unwrap().expect("paste succeeds");
        assert!(response.sync_time.is_some());
        payloads.push(response.data);
    }

    assert_eq!(plugin.fetches(), 1);
    for data in &payloads {
        assert_eq!(data, &payloads[0]);
        assert_eq!(data.primary_text(), Some("from phone"));
        assert!(data.is_remote);
    }
}

#[tokio::test]
async fn cached_publication_suppresses_refetch() {
    let plugin = Arc::new(MemoryPlugin::new());
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("v1")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;

    let first = engine.get_paste_data(5).await.unwrap();
    assert_eq!(first.data.primary_text(), Some("v1"));
    assert!(first.sync_time.is_some());
    assert_eq!(plugin.fetches(), 1);

    // Same publication is still the top event; no second fetch happens
    let second = engine.get_paste_data(5).await.unwrap();
    assert_eq!(second.data.primary_text(), Some("v1"));
    assert_eq!(second.sync_time, None);
    assert_eq!(plugin.fetches(), 1);
}

#[tokio::test]
async fn republished_sequence_triggers_new_fetch() {
    let plugin = Arc::new(MemoryPlugin::new());
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("v1")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;
    engine.get_paste_data(5).await.unwrap();
    assert_eq!(plugin.fetches(), 1);

    // Same (device, seq) with a fresh expiration is a new publication
    let mut republished = event.clone();
    republished.expiration = event.expiration + 5_000;
    plugin.publish(&republished, &PasteData::text("v2")).await;

    let response = engine.get_paste_data(5).await.unwrap();
    assert_eq!(response.data.primary_text(), Some("v2"));
    assert_eq!(plugin.fetches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_write_during_fetch_wins_the_cache() {
    let plugin = Arc::new(MemoryPlugin::with_fetch_delay(Duration::from_millis(400)));
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("remote stuff")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;

    let fetcher = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.get_paste_data(5).await })
    };

    // Local copy lands while the remote fetch is still in flight
    sleep(Duration::from_millis(150)).await;
    engine
        .set_paste_data(5, PasteData::text("local wins"))
        .await
        .unwrap();

    // The fetch caller still receives the remote payload it asked for
    let fetched = fetcher.await.unwrap().expect("fetch caller gets data");
    assert_eq!(fetched.data.primary_text(), Some("remote stuff"));
    assert!(fetched.data.is_remote);

    // But the cache keeps the newer local write
    let current = engine.get_paste_data(5).await.unwrap();
    assert_eq!(current.data.primary_text(), Some("local wins"));
    assert_eq!(current.sync_time, None);
}

#[tokio::test]
async fn corrupt_payload_surfaces_decode_error() {
    let plugin = Arc::new(MemoryPlugin::new());
    let engine = engine_with(Arc::clone(&plugin), test_config()).await;

    engine
        .set_paste_data(5, PasteData::text("stale local"))
        .await
        .unwrap();

    // Outlive the local publication so the resolver picks it
    let mut event = remote_event(5, 9);
    event.expiration = now_ms() + 300_000;
    plugin
        .publish_raw(&event, Bytes::from_static(b"not a payload"))
        .await;

    match engine.get_paste_data(5).await {
        Err(SyncError::Decode(_)) => {}
        other => panic!("expected Decode error, got {other:?}"),
    }

    // The corrupt fetch must not clobber what was cached before
    engine.set_screen_locked(true);
    let local = engine.get_paste_data(5).await.unwrap();
    assert_eq!(local.data.primary_text(), Some("stale local"));
}

#[tokio::test]
async fn transport_status_codes_pass_through() {
    let plugin = Arc::new(MemoryPlugin::new());
    let event = remote_event(5, 1);
    // Event announced but its payload is gone
    {
        let mut events = plugin.events.lock().await;
        events.insert(0, event.clone());
    }

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;
    match engine.get_paste_data(5).await {
        Err(SyncError::Transport(code)) => assert_eq!(code, STATUS_NOT_FOUND),
        other => panic!("expected Transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn own_fetch_timeout_is_bounded() {
    let plugin = Arc::new(MemoryPlugin::with_fetch_delay(Duration::from_secs(3)));
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("too slow")).await;

    let mut config = test_config();
    config.sync.await_timeout_ms = 500;
    let engine = engine_with(Arc::clone(&plugin), config).await;

    let start = Instant::now();
    let result = engine.get_paste_data(5).await;
    let elapsed = start.elapsed();

    assert_eq!(result.unwrap_err(), SyncError::Timeout);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(2500), "wait overshot: {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn joiner_timeout_reports_task_processing() {
    let plugin = Arc::new(MemoryPlugin::with_fetch_delay(Duration::from_secs(3)));
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("too slow")).await;

    let mut config = test_config();
    config.sync.await_timeout_ms = 500;
    let engine = engine_with(Arc::clone(&plugin), config).await;

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.get_paste_data(5).await })
    };
    let second = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.get_paste_data(5).await })
    };

    let errors = vec![
        first.await.unwrap().unwrap_err(),
        second.await.unwrap().unwrap_err(),
    ];
    assert!(errors.contains(&SyncError::Timeout), "errors: {errors:?}");
    assert!(
        errors.contains(&SyncError::TaskProcessing),
        "errors: {errors:?}"
    );
}

#[tokio::test]
async fn delayed_record_values_fetch_once() {
    let plugin = Arc::new(MemoryPlugin::new().with_delay_records());
    let mut event = remote_event(5, 1);
    event.is_delay = true;
    event.data_types = vec!["text/plain".into(), "image/png".into()];

    let payload = PasteData::with_records(vec![
        PasteRecord::text(1, "caption"),
        PasteRecord::delay(2, "image/png"),
    ]);
    plugin.publish(&event, &payload).await;
    plugin
        .put_record_value(2, "image/png", EntryValue::Bytes(vec![9, 9, 9]))
        .await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;

    let response = engine.get_paste_data(5).await.unwrap();
    assert!(response.data.has_delay_records());
    assert_eq!(
        response.data.record(2).unwrap().value_for("image/png"),
        Some(&EntryValue::Empty)
    );

    let first = engine.record_value(5, 2, "image/png").await.unwrap();
    assert_eq!(first, EntryValue::Bytes(vec![9, 9, 9]));
    assert_eq!(plugin.record_fetches(), 1);

    // Second access is served from the filled cache entry
    let second = engine.record_value(5, 2, "image/png").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(plugin.record_fetches(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_record_accesses_share_one_fetch() {
    let plugin = Arc::new(
        MemoryPlugin::with_fetch_delay(Duration::from_millis(300)).with_delay_records(),
    );
    let mut event = remote_event(5, 1);
    event.is_delay = true;
    event.data_types = vec!["text/plain".into(), "image/png".into()];

    let payload = PasteData::with_records(vec![
        PasteRecord::text(1, "caption"),
        PasteRecord::delay(2, "image/png"),
    ]);
    plugin.publish(&event, &payload).await;
    plugin
        .put_record_value(2, "image/png", EntryValue::Bytes(vec![7, 7]))
        .await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;
    engine.get_paste_data(5).await.unwrap();

    let mut callers = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        callers.push(tokio::spawn(async move {
            engine.record_value(5, 2, "image/png").await
        }));
    }
    for caller in callers {
        let value = caller.await.unwrap().expect("record fill succeeds");
        assert_eq!(value, EntryValue::Bytes(vec![7, 7]));
    }
    assert_eq!(plugin.record_fetches(), 1);
}

#[tokio::test]
async fn locked_screen_never_fetches() {
    let plugin = Arc::new(MemoryPlugin::new());
    let event = remote_event(5, 1);
    plugin.publish(&event, &PasteData::text("waiting")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;
    engine.set_screen_locked(true);

    match engine.get_paste_data(5).await {
        Err(SyncError::NoContent) => {}
        other => panic!("expected NoContent, got {other:?}"),
    }
    assert_eq!(plugin.fetches(), 0);

    engine.set_screen_locked(false);
    let response = engine.get_paste_data(5).await.unwrap();
    assert_eq!(response.data.primary_text(), Some("waiting"));
    assert_eq!(plugin.fetches(), 1);
}

#[tokio::test]
async fn unknown_device_falls_back_to_local() {
    let plugin = Arc::new(MemoryPlugin::new());
    let mut event = remote_event(5, 1);
    event.device_id = "ghost".into();
    plugin.publish(&event, &PasteData::text("untrusted")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;
    match engine.get_paste_data(5).await {
        Err(SyncError::NoContent) => {}
        other => panic!("expected NoContent, got {other:?}"),
    }
    assert_eq!(plugin.fetches(), 0);
}

#[tokio::test]
async fn account_mismatch_falls_back_to_local() {
    let plugin = Arc::new(MemoryPlugin::new());
    let mut event = remote_event(5, 1);
    event.account = "someone-else".into();
    plugin.publish(&event, &PasteData::text("foreign")).await;

    let engine = engine_with(Arc::clone(&plugin), test_config()).await;
    match engine.get_paste_data(5).await {
        Err(SyncError::NoContent) => {}
        other => panic!("expected NoContent, got {other:?}"),
    }
    assert_eq!(plugin.fetches(), 0);
}

#[tokio::test]
async fn copy_on_one_device_pastes_on_another() {
    let plugin = Arc::new(MemoryPlugin::new());

    let engine_a = engine_with(Arc::clone(&plugin), test_config()).await;

    let mut config_b = test_config();
    config_b.device.device_id = "laptop".into();
    config_b.device.device_name = "laptop-host".into();
    let engine_b = engine_with(Arc::clone(&plugin), config_b).await;

    let published = engine_a
        .set_paste_data(5, PasteData::text("hello from local"))
        .await
        .unwrap();
    assert_eq!(published.device_id, "local");

    let response = engine_b.get_paste_data(5).await.unwrap();
    assert_eq!(response.data.primary_text(), Some("hello from local"));
    assert!(response.data.is_remote);
    assert!(response.sync_time.is_some());
    assert_eq!(plugin.fetches(), 1);

    // The originating device keeps serving its own copy locally
    let own = engine_a.get_paste_data(5).await.unwrap();
    assert_eq!(own.data.primary_text(), Some("hello from local"));
    assert!(!own.data.is_remote);
    assert_eq!(plugin.fetches(), 1);
}
