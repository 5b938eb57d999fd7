// src/core/lifecycle.rs

//! Owns the single shared directory connection.
//!
//! The manager lazily opens one connection on first demand and hands the same
//! in-flight attempt to every concurrent caller. Once the transport reports the
//! connection idle (or broken), the cached connection is dropped and the next
//! caller transparently starts a fresh attempt.
//!
//! The cached state is a single slot holding a shared readiness future tagged
//! with a generation number. The slot is only ever inspected and replaced while
//! holding a synchronous lock, and the lock is never held across an `.await`,
//! so "is there a connection?" and "install a new one" happen atomically.
//! Events and completions carry the generation they belong to, so a late
//! signal from an old connection never affects a newer one.

use super::errors::{DirError, DirResult};
use super::transport::{ConnectOptions, Session, Transport, TransportEvent};
use crate::config::Config;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::warn;

/// A ready connection: transport connected and, if configured, bound.
///
/// Callers borrow it for the duration of one operation. Only the manager
/// closes it.
#[derive(Clone)]
pub struct Connection {
    generation: u64,
    verbose: bool,
    session: Arc<dyn Session>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    fn new(generation: u64, verbose: bool, session: Arc<dyn Session>) -> Self {
        Self {
            generation,
            verbose,
            session,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifies the acquisition sequence that produced this connection.
    /// Two handles with the same generation share one underlying session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the session once; later calls are no-ops. Close failures are
    /// logged and swallowed.
    async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lifecycle_event!(
            self.verbose,
            generation = self.generation,
            reason,
            "destroying LDAP connection"
        );
        if let Err(e) = self.session.close().await {
            warn!(generation = self.generation, error = %e, "failed to close LDAP connection");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The single-producer, multi-consumer readiness future.
type ReadyFuture = Shared<BoxFuture<'static, DirResult<Connection>>>;

struct Slot {
    generation: u64,
    ready: ReadyFuture,
}

impl Slot {
    fn connection(&self) -> Option<Connection> {
        match self.ready.peek() {
            Some(Ok(conn)) => Some(conn.clone()),
            _ => None,
        }
    }

    fn has_failed(&self) -> bool {
        matches!(self.ready.peek(), Some(Err(_)))
    }

    /// Closes the connection if it has been established. A still-pending
    /// attempt is closed by its driver task once it completes.
    async fn close(self, reason: &str) {
        if let Some(conn) = self.connection() {
            conn.close(reason).await;
        }
    }
}

/// What the manager currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `configure()` has not been called.
    Unconfigured,
    /// No connection is cached; the next operation will open one.
    Disconnected,
    /// An acquisition sequence is in flight.
    Connecting,
    /// A connection is ready for use.
    Ready,
    /// The last acquisition failed; the next operation retries.
    Failed,
}

struct State {
    config: Option<Arc<Config>>,
    slot: Option<Slot>,
    last_generation: u64,
    /// A generation whose transport failed before it finished connecting.
    faulted: Option<u64>,
    /// Every generation up to this one was discarded by `shutdown`.
    shut_down_through: u64,
}

/// Where a resolved connection stands relative to the slot.
enum Standing {
    Current,
    /// Another attempt replaced it, or it was torn down.
    Replaced,
    /// Its transport failed while it was connecting; the slot was taken.
    Faulted(Slot),
    /// `shutdown` discarded it while it was connecting.
    ShutDown,
}

/// How many superseded attempts one `acquire` follows before giving up.
const MAX_ACQUIRE_ROUNDS: usize = 3;

struct Inner {
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    attempts: AtomicU64,
}

/// Lazily creates, shares, and tears down the one directory connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(State {
                    config: None,
                    slot: None,
                    last_generation: 0,
                    faulted: None,
                    shut_down_through: 0,
                }),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Sets the configuration used by subsequent acquisitions. A connection
    /// that is already established keeps the settings it was opened with.
    pub fn configure(&self, config: Config) -> DirResult<()> {
        config.validate()?;
        self.inner.state.lock().config = Some(Arc::new(config));
        Ok(())
    }

    /// The configuration currently in effect for new acquisitions.
    pub fn config(&self) -> Option<Arc<Config>> {
        self.inner.state.lock().config.clone()
    }

    /// Returns the ready connection, opening one if necessary.
    ///
    /// Concurrent callers share one acquisition sequence and all observe its
    /// outcome. Fails immediately with [`DirError::NotConfigured`] before
    /// [`configure`](Self::configure).
    ///
    /// A caller whose attempt was replaced while it waited (by
    /// [`force_reconnect`](Self::force_reconnect), or because the transport
    /// failed during connect) follows the current attempt instead. An attempt
    /// discarded by [`shutdown`](Self::shutdown) is returned as is, closed.
    pub async fn acquire(&self) -> DirResult<Connection> {
        for _ in 0..MAX_ACQUIRE_ROUNDS {
            let ready = self.ready_future()?;
            let conn = ready.await?;
            match self.inner.standing(conn.generation()) {
                Standing::Current | Standing::ShutDown => return Ok(conn),
                Standing::Replaced => {}
                Standing::Faulted(slot) => slot.close("transport error during connect").await,
            }
        }
        Err(DirError::ConnectionClosed)
    }

    // Check-then-install happens entirely under the lock, with no await point.
    fn ready_future(&self) -> DirResult<ReadyFuture> {
        let mut state = self.inner.state.lock();
        let config = state.config.clone().ok_or(DirError::NotConfigured)?;
        if let Some(slot) = &state.slot
            && !slot.has_failed()
        {
            return Ok(slot.ready.clone());
        }
        Ok(self.inner.install(&mut state, config))
    }

    /// Discards the cached connection and starts a new acquisition in the
    /// background, without waiting for it. Must be called within a tokio
    /// runtime.
    pub fn force_reconnect(&self) -> DirResult<()> {
        let previous = {
            let mut state = self.inner.state.lock();
            let config = state.config.clone().ok_or(DirError::NotConfigured)?;
            let previous = state.slot.take();
            self.inner.install(&mut state, config);
            previous
        };
        if let Some(slot) = previous {
            tokio::spawn(async move { slot.close("forced reconnect").await });
        }
        Ok(())
    }

    /// Closes the live connection, if any, and clears the cached state.
    /// Safe to call repeatedly; close failures are only logged.
    pub async fn shutdown(&self) {
        let slot = {
            let mut state = self.inner.state.lock();
            state.shut_down_through = state.last_generation;
            state.slot.take()
        };
        if let Some(slot) = slot {
            slot.close("shutdown").await;
        }
    }

    /// Drops the cached connection if it still belongs to `generation`.
    /// Executors call this when an operation found its session closed.
    pub async fn invalidate(&self, generation: u64, reason: &str) {
        self.inner.teardown(generation, reason).await;
    }

    pub fn state(&self) -> ConnectionState {
        let state = self.inner.state.lock();
        if state.config.is_none() {
            return ConnectionState::Unconfigured;
        }
        match &state.slot {
            None => ConnectionState::Disconnected,
            Some(slot) => match slot.ready.peek() {
                None => ConnectionState::Connecting,
                Some(Ok(_)) => ConnectionState::Ready,
                Some(Err(_)) => ConnectionState::Failed,
            },
        }
    }

    /// Number of acquisition sequences started so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl Inner {
    /// Installs a new readiness future in the slot and starts driving it.
    /// The caller holds the state lock.
    fn install(self: &Arc<Self>, state: &mut State, config: Arc<Config>) -> ReadyFuture {
        state.last_generation += 1;
        state.faulted = None;
        let generation = state.last_generation;
        self.attempts.fetch_add(1, Ordering::SeqCst);

        // The listener is running before the transport is asked to connect,
        // so no event can be emitted without someone receiving it.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch_events(
            Arc::downgrade(self),
            generation,
            config.verbose,
            events_rx,
        ));

        let ready = connect_sequence(self.transport.clone(), config, generation, events_tx)
            .boxed()
            .shared();
        state.slot = Some(Slot {
            generation,
            ready: ready.clone(),
        });

        // Drive the attempt to completion even if every caller stops waiting.
        // A connection that lost its slot while connecting is closed here.
        let driver = ready.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Ok(conn) = driver.await else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                conn.close("superseded").await;
                return;
            };
            match inner.standing(generation) {
                Standing::Current => {}
                Standing::Faulted(slot) => slot.close("transport error during connect").await,
                Standing::Replaced | Standing::ShutDown => conn.close("superseded").await,
            }
        });

        ready
    }

    /// Classifies a resolved `generation`. A faulted one is taken out of the
    /// slot, so exactly one caller receives it for closing.
    fn standing(&self, generation: u64) -> Standing {
        let mut state = self.state.lock();
        match state.slot.as_ref().map(|slot| slot.generation) {
            Some(current) if current == generation => {
                if state.faulted != Some(generation) {
                    return Standing::Current;
                }
                state.faulted = None;
                match state.slot.take() {
                    Some(slot) => Standing::Faulted(slot),
                    None => Standing::Replaced,
                }
            }
            Some(_) => Standing::Replaced,
            None if generation <= state.shut_down_through => Standing::ShutDown,
            None => Standing::Replaced,
        }
    }

    /// Records a transport error for `generation`. A ready connection is
    /// taken out of the slot and returned for closing. One still connecting
    /// is flagged, and discarded as soon as it resolves.
    fn fault(&self, generation: u64) -> Option<Slot> {
        let mut state = self.state.lock();
        let ready = match &state.slot {
            Some(slot) if slot.generation == generation => slot.connection().is_some(),
            _ => return None,
        };
        if ready {
            state.slot.take()
        } else {
            state.faulted = Some(generation);
            None
        }
    }

    /// Drops the slot if it still belongs to `generation`, then closes it.
    async fn teardown(&self, generation: u64, reason: &str) {
        let slot = {
            let mut state = self.state.lock();
            if state
                .slot
                .as_ref()
                .is_some_and(|slot| slot.generation == generation)
            {
                state.slot.take()
            } else {
                None
            }
        };
        if let Some(slot) = slot {
            slot.close(reason).await;
        }
    }
}

/// Connects, binds if a DN is configured, and yields the ready connection.
async fn connect_sequence(
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> DirResult<Connection> {
    lifecycle_event!(config.verbose, uri = %config.uri, generation, "connecting to LDAP server");
    let options = ConnectOptions::from(config.as_ref());
    let session = match transport.connect(&options, events).await {
        Ok(session) => session,
        Err(e) => {
            warn!(uri = %config.uri, error = %e, "could not connect to any LDAP server");
            return Err(e);
        }
    };
    lifecycle_event!(config.verbose, generation, "connected to LDAP server");

    let conn = Connection::new(generation, config.verbose, session);
    if let Some(dn) = &config.dn {
        let password = config.password.as_deref().unwrap_or_default();
        if let Err(e) = conn.session().simple_bind(dn, password).await {
            warn!(dn = %dn, error = %e, "LDAP bind failed");
            conn.close("bind failed").await;
            return Err(e);
        }
        lifecycle_event!(config.verbose, dn = %dn, generation, "bound to LDAP server");
    }
    Ok(conn)
}

/// Reacts to asynchronous transport signals for one generation.
async fn watch_events(
    inner: Weak<Inner>,
    generation: u64,
    verbose: bool,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::ConnectError(message) => {
                warn!(generation, error = %message, "LDAP connect error");
            }
            TransportEvent::Idle => {
                lifecycle_event!(verbose, generation, "LDAP connection idle");
                inner.teardown(generation, "idle").await;
                return;
            }
            TransportEvent::Error(message) => {
                warn!(generation, error = %message, "LDAP connection error");
                if let Some(slot) = inner.fault(generation) {
                    slot.close("transport error").await;
                    return;
                }
            }
        }
    }
    lifecycle_event!(verbose, generation, "LDAP event stream closed");
}
