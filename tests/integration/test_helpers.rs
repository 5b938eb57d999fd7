// tests/integration/test_helpers.rs

//! Test helpers: a scripted in-memory transport and a `TestContext` wrapping a
//! client built on it.

#![allow(dead_code)]

use async_trait::async_trait;
use dirconn::config::Config;
use dirconn::core::errors::{DirError, DirResult};
use dirconn::core::mutation::Modification;
use dirconn::core::transport::{
    ConnectOptions, EventSink, SearchEvent, SearchRequest, Session, Transport, TransportEvent,
};
use dirconn::core::{ConnectionState, DirectoryClient, RawEntry};
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const TEST_URI: &str = "ldap://ldap.example.org";
pub const TEST_BASE: &str = "dc=example,dc=org";
pub const TEST_BIND_DN: &str = "cn=reader,dc=example,dc=org";
pub const TEST_PASSWORD: &str = "secret";

/// A mutation as the mock session received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedMutation {
    Add(String, Vec<(String, Vec<String>)>),
    Delete(String),
    Modify(String, Vec<Modification>),
}

/// State shared between the mock transport and the sessions it opens.
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub binds: AtomicUsize,
    pub closes: AtomicUsize,
    /// How long `connect` takes, so concurrent callers pile up behind it.
    pub connect_delay: Mutex<Duration>,
    /// `ConnectError` events emitted during each connect before it succeeds.
    pub connect_errors: AtomicUsize,
    /// The next this-many connects report a transport `Error` while connecting.
    pub faulted_connects: AtomicUsize,
    /// Ids of sessions whose operations fail as if the server hung up.
    pub dead_sessions: Mutex<Vec<usize>>,
    pub connect_failure: Mutex<Option<DirError>>,
    pub bind_failure: Mutex<Option<DirError>>,
    pub close_failure: Mutex<Option<DirError>>,
    pub mutation_failure: Mutex<Option<DirError>>,
    /// Events replayed for every search.
    pub search_script: Mutex<Vec<SearchEvent>>,
    /// Every search sent, with the id of the session that served it.
    pub searches: Mutex<Vec<(usize, SearchRequest)>>,
    pub mutations: Mutex<Vec<RecordedMutation>>,
    pub connect_options: Mutex<Vec<ConnectOptions>>,
    pub sinks: Mutex<Vec<EventSink>>,
    pub bound_as: Mutex<Vec<(String, String)>>,
}

pub struct MockTransport {
    pub state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> DirResult<Arc<dyn Session>> {
        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.connect_options.lock().push(options.clone());
        self.state.sinks.lock().push(events.clone());

        for _ in 0..self.state.connect_errors.load(Ordering::SeqCst) {
            let _ = events.send(TransportEvent::ConnectError("connection refused".into()));
        }

        let faulted = self
            .state
            .faulted_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if faulted {
            let _ = events.send(TransportEvent::Error("connection reset by peer".into()));
        }

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(e) = self.state.connect_failure.lock().clone() {
            return Err(e);
        }

        Ok(Arc::new(MockSession {
            id,
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockSession {
    pub id: usize,
    state: Arc<MockState>,
    closed: AtomicBool,
}

impl MockSession {
    fn ensure_open(&self) -> DirResult<()> {
        let dead = self.state.dead_sessions.lock().contains(&self.id);
        if dead || self.closed.load(Ordering::SeqCst) {
            Err(DirError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn mutation_outcome(&self) -> DirResult<()> {
        match self.state.mutation_failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn simple_bind(&self, dn: &str, password: &str) -> DirResult<()> {
        self.ensure_open()?;
        self.state.binds.fetch_add(1, Ordering::SeqCst);
        self.state
            .bound_as
            .lock()
            .push((dn.to_string(), password.to_string()));
        match self.state.bind_failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn search(&self, request: SearchRequest) -> DirResult<BoxStream<'static, SearchEvent>> {
        self.ensure_open()?;
        self.state.searches.lock().push((self.id, request));
        let events = self.state.search_script.lock().clone();
        Ok(futures::stream::iter(events).boxed())
    }

    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<String>)>) -> DirResult<()> {
        self.ensure_open()?;
        self.state
            .mutations
            .lock()
            .push(RecordedMutation::Add(dn.to_string(), attributes));
        self.mutation_outcome()
    }

    async fn delete(&self, dn: &str) -> DirResult<()> {
        self.ensure_open()?;
        self.state
            .mutations
            .lock()
            .push(RecordedMutation::Delete(dn.to_string()));
        self.mutation_outcome()
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirResult<()> {
        self.ensure_open()?;
        self.state
            .mutations
            .lock()
            .push(RecordedMutation::Modify(dn.to_string(), changes));
        self.mutation_outcome()
    }

    async fn close(&self) -> DirResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        match self.state.close_failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A client wired to a [`MockTransport`].
pub struct TestContext {
    pub client: DirectoryClient,
    pub mock: Arc<MockState>,
}

impl TestContext {
    /// An unconfigured client.
    pub fn unconfigured() -> Self {
        let transport = MockTransport::new();
        let mock = transport.state.clone();
        Self {
            client: DirectoryClient::new(Arc::new(transport)),
            mock,
        }
    }

    /// A client configured for an anonymous session.
    pub fn new() -> Self {
        Self::with_config(Config::new(TEST_URI))
    }

    /// A client configured to bind as the test reader.
    pub fn with_bind() -> Self {
        Self::with_config(Config::new(TEST_URI).with_bind(TEST_BIND_DN, TEST_PASSWORD))
    }

    pub fn with_config(config: Config) -> Self {
        let ctx = Self::unconfigured();
        ctx.client
            .configure(config)
            .expect("test configuration should be valid");
        ctx
    }

    pub fn connects(&self) -> usize {
        self.mock.connects.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> usize {
        self.mock.binds.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.mock.closes.load(Ordering::SeqCst)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.mock.connect_delay.lock() = delay;
    }

    /// Makes every later operation on session `id` (1-based, in connect
    /// order) fail with `ConnectionClosed`.
    pub fn kill_session(&self, id: usize) {
        self.mock.dead_sessions.lock().push(id);
    }

    pub fn script_search(&self, events: Vec<SearchEvent>) {
        *self.mock.search_script.lock() = events;
    }

    pub fn last_search(&self) -> (usize, SearchRequest) {
        self.mock
            .searches
            .lock()
            .last()
            .cloned()
            .expect("a search should have been sent")
    }

    /// Pushes a transport event on the sink of the `index`-th connection
    /// (0-based, in connect order).
    pub fn emit_on(&self, index: usize, event: TransportEvent) {
        let sink = self.mock.sinks.lock()[index].clone();
        sink.send(event).expect("event listener should be running");
    }

    /// Pushes a transport event on the most recent connection's sink.
    pub fn emit(&self, event: TransportEvent) {
        let last = self.mock.sinks.lock().len() - 1;
        self.emit_on(last, event);
    }

    /// Waits (bounded) for the manager to reach `expected`.
    pub async fn wait_for_state(&self, expected: ConnectionState) {
        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            while self.client.state() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "state never became {expected:?}, still {:?}",
            self.client.state()
        );
    }

    /// Waits (bounded) until `count` sessions have been closed.
    pub async fn wait_for_closes(&self, count: usize) {
        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            while self.closes() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "expected {count} closed sessions, saw {}",
            self.closes()
        );
    }
}

/// Builds a raw entry under the test base.
pub fn entry(rdn: &str) -> RawEntry {
    RawEntry::new(format!("{rdn},{TEST_BASE}"))
}

/// A successful end-of-search event.
pub fn done() -> SearchEvent {
    SearchEvent::Done {
        rc: 0,
        text: String::new(),
    }
}
