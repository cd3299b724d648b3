//! Fakes shared by the unit tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{Notify, broadcast, mpsc};

use crate::{
    sink::{OutputSink, OutputSinks, error::SinkResult},
    source::{
        EndpointResolver, FeedConnector, FeedEvent, FeedStream, SensorDevice, SensorEvent,
        SensorTransport,
        error::{
            FeedConnectionError, FeedConnectionResult, LookupError, LookupResult, TransportError,
            TransportResult,
        },
    },
};

/// Lets every task that is ready run to completion or to its next await point.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkCall {
    Level(String, f32),
    Presence(String, bool),
    Note(u8, u8),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn levels(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Level(_, value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn presences(&self) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Presence(_, present) => Some(present),
                _ => None,
            })
            .collect()
    }

    pub fn notes(&self) -> Vec<(u8, u8)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Note(note, velocity) => Some((note, velocity)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn send_level(&self, address: &str, value: f32) -> SinkResult<()> {
        self.record(SinkCall::Level(address.to_string(), value));
        Ok(())
    }

    async fn send_presence(&self, address: &str, present: bool) -> SinkResult<()> {
        self.record(SinkCall::Presence(address.to_string(), present));
        Ok(())
    }

    async fn send_note(&self, note: u8, velocity: u8) -> SinkResult<()> {
        self.record(SinkCall::Note(note, velocity));
        Ok(())
    }
}

/// A level sink and a note sink, both recording.
pub(crate) struct RecordingSinks {
    pub level: Arc<RecordingSink>,
    pub note: Arc<RecordingSink>,
}

impl RecordingSinks {
    pub fn new() -> Self {
        Self {
            level: Arc::new(RecordingSink::default()),
            note: Arc::new(RecordingSink::default()),
        }
    }

    pub fn sinks(&self) -> OutputSinks {
        OutputSinks::new(self.level.clone(), self.note.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportCall {
    Scan,
    Connect(String),
    Disconnect(String),
}

pub(crate) struct FakeSensorTransport {
    devices: Mutex<Vec<SensorDevice>>,
    events_tx: broadcast::Sender<SensorEvent>,
    calls: Mutex<Vec<TransportCall>>,
    fail_connect: AtomicBool,
    scan_gate: Mutex<Option<Arc<Notify>>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    outstanding_connects: AtomicUsize,
    max_outstanding_connects: AtomicUsize,
}

impl FakeSensorTransport {
    pub fn new(device_ids: &[&str]) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        let devices = device_ids
            .iter()
            .map(|id| SensorDevice::new(*id, format!("Sensor {id}")))
            .collect();

        Arc::new(Self {
            devices: Mutex::new(devices),
            events_tx,
            calls: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            scan_gate: Mutex::new(None),
            connect_gate: Mutex::new(None),
            outstanding_connects: AtomicUsize::new(0),
            max_outstanding_connects: AtomicUsize::new(0),
        })
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent scans wait until the returned gate is notified.
    pub fn hold_scans(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.scan_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Makes subsequent connects wait until the returned gate is notified.
    pub fn hold_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn emit(&self, event: SensorEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect(_)))
            .count()
    }

    pub fn max_outstanding_connects(&self) -> usize {
        self.max_outstanding_connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorTransport for FakeSensorTransport {
    async fn scan(&self) -> TransportResult<Vec<SensorDevice>> {
        self.calls.lock().unwrap().push(TransportCall::Scan);

        let gate = self.scan_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect(&self, device_id: &str) -> TransportResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Connect(device_id.to_string()));

        let outstanding = self.outstanding_connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding_connects
            .fetch_max(outstanding, Ordering::SeqCst);

        let gate = self.connect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.outstanding_connects.fetch_sub(1, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                device_id: device_id.to_string(),
                reason: "out of range".to_string(),
            });
        }

        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> TransportResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Disconnect(device_id.to_string()));
        Ok(())
    }

    fn notifications(&self) -> broadcast::Receiver<SensorEvent> {
        self.events_tx.subscribe()
    }
}

pub(crate) struct FakeResolver {
    endpoint: Option<String>,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub fn returning(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: Some(endpoint.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            endpoint: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointResolver for FakeResolver {
    async fn resolve_endpoint(&self, _feed_id: &str) -> LookupResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        self.endpoint
            .clone()
            .ok_or(LookupError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

pub(crate) struct FakeFeedStream {
    events_rx: mpsc::UnboundedReceiver<FeedEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FeedStream for FakeFeedStream {
    async fn next_event(&mut self) -> FeedConnectionResult<FeedEvent> {
        Ok(self.events_rx.recv().await.unwrap_or(FeedEvent::Closed))
    }

    async fn close(&mut self) -> FeedConnectionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeFeed {
    events_tx: mpsc::UnboundedSender<FeedEvent>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    opened: Mutex<Vec<(String, FakeFeed)>>,
    fail_open: AtomicBool,
    open_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent opens wait until the returned gate is notified.
    pub fn hold_opens(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.open_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn last_url(&self) -> Option<String> {
        self.opened.lock().unwrap().last().map(|(url, _)| url.clone())
    }

    /// Pushes `event` into the most recently opened feed.
    pub fn push(&self, event: FeedEvent) {
        if let Some((_, feed)) = self.opened.lock().unwrap().last() {
            let _ = feed.events_tx.send(event);
        }
    }

    pub fn push_text(&self, text: &str) {
        self.push(FeedEvent::Message(text.to_string()));
    }

    pub fn last_closed(&self) -> bool {
        self.opened
            .lock()
            .unwrap()
            .last()
            .is_some_and(|(_, feed)| feed.closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl FeedConnector for FakeConnector {
    async fn open(&self, url: &str) -> FeedConnectionResult<Box<dyn FeedStream>> {
        let gate = self.open_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(FeedConnectionError::MissingHost);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        self.opened.lock().unwrap().push((
            url.to_string(),
            FakeFeed {
                events_tx,
                closed: closed.clone(),
            },
        ));

        Ok(Box::new(FakeFeedStream { events_rx, closed }))
    }
}
