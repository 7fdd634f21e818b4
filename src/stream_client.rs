//! Reconnecting telemetry subscriber.
//!
//! A [`StreamingClient`] owns one logical subscription. `start()` spawns a
//! worker task that walks the connection state machine:
//!
//! ```text
//!            start()
//!   Idle ───────────────► Connecting ──open──► Open
//!     ▲                      ▲                  │ close / connect failure
//!     │                      └──── backoff ─────┤
//!     │                                         ▼
//!   (new)                            Closed-Retrying
//!
//!   stop() from any state ──► Stopped
//! ```
//!
//! Reconnection is only ever scheduled after a close, by the single worker
//! task, so two connection attempts from one client can never overlap. A
//! worker started after `stop()` first waits for the stopped one to finish
//! closing its connection.
//! Transport errors are logged and left to the close that follows them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backoff::BackoffSchedule;
use crate::config::{BackoffConfig, EndpointConfig};
use crate::error::{ConfigError, FrameError};
use crate::telemetry::{self, CurrentSample, FrameKind, JointReading, TelemetryFrame};
use crate::transport::{Connection, Transport, TransportEvent, WsTransport};

/// Connection lifecycle of one client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ClosedRetrying,
    Stopped,
}

/// Callback receiving frames of the client's expected kind.
pub type Dispatcher = Box<dyn FnMut(TelemetryFrame) + Send>;

/// Where a client connects and what it listens for. Immutable once the
/// client is built.
#[derive(Clone, Debug)]
pub struct Endpoint {
    name: &'static str,
    url: Url,
    kind: FrameKind,
    backoff: BackoffConfig,
}

impl Endpoint {
    pub fn new(name: &'static str, url: Url, kind: FrameKind, backoff: BackoffConfig) -> Self {
        Self {
            name,
            url,
            kind,
            backoff,
        }
    }

    pub fn from_config(
        name: &'static str,
        config: &EndpointConfig,
        kind: FrameKind,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            name,
            config.parsed_url()?,
            kind,
            config.backoff.clone(),
        ))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A subscription to one streaming endpoint that reconnects forever until
/// stopped.
pub struct StreamingClient<T: Transport = WsTransport> {
    endpoint: Arc<Endpoint>,
    transport: Arc<T>,
    dispatch: Arc<Mutex<Dispatcher>>,
    state: Arc<watch::Sender<ConnectionState>>,
    running: Option<Running>,
    /// Worker of the last `stop()`, possibly still closing its connection.
    retiring: Option<JoinHandle<()>>,
}

impl<T: Transport> StreamingClient<T> {
    pub fn new(
        endpoint: Endpoint,
        transport: T,
        dispatch: impl FnMut(TelemetryFrame) + Send + 'static,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            endpoint: Arc::new(endpoint),
            transport: Arc::new(transport),
            dispatch: Arc::new(Mutex::new(Box::new(dispatch))),
            state: Arc::new(state),
            running: None,
            retiring: None,
        }
    }

    /// Client for `jointUpdate` frames.
    pub fn joint(
        config: &EndpointConfig,
        transport: T,
        mut on_update: impl FnMut(Vec<JointReading>) + Send + 'static,
    ) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::from_config("joint", config, FrameKind::JointUpdate)?;
        Ok(Self::new(endpoint, transport, move |frame| {
            if let TelemetryFrame::JointUpdate { data } = frame {
                on_update(data);
            }
        }))
    }

    /// Client for `CURRENT_DATA` frames.
    pub fn current(
        config: &EndpointConfig,
        transport: T,
        mut on_sample: impl FnMut(CurrentSample) + Send + 'static,
    ) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::from_config("current", config, FrameKind::Current)?;
        Ok(Self::new(endpoint, transport, move |frame| {
            if let TelemetryFrame::Current(sample) = frame {
                on_sample(sample);
            }
        }))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Begin connecting. A no-op while already running.
    ///
    /// Must be called from within a tokio runtime. Every start begins with a
    /// fresh backoff schedule.
    pub fn start(&mut self) {
        if self.running.is_some() {
            tracing::debug!("[{}] start() ignored, already running", self.endpoint.name);
            return;
        }

        let cancel = CancellationToken::new();
        self.state.send_replace(ConnectionState::Connecting);

        let worker = Worker {
            endpoint: self.endpoint.clone(),
            transport: self.transport.clone(),
            dispatch: self.dispatch.clone(),
            state: self.state.clone(),
            backoff: BackoffSchedule::from(&self.endpoint.backoff),
            cancel: cancel.clone(),
            previous: self.retiring.take(),
        };
        let task = tokio::spawn(worker.run());

        self.running = Some(Running { cancel, task });
    }

    /// Stop the client: close any open transport and cancel any pending
    /// reconnection. Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            tracing::info!("[{}] Stopping client", self.endpoint.name);
            // The worker observes this at its next suspension point, closes
            // the connection it holds and exits without scheduling anything.
            running.cancel.cancel();
            self.retiring = Some(running.task);
        }
        self.state.send_replace(ConnectionState::Stopped);
    }
}

impl<T: Transport> Drop for StreamingClient<T> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

/// The task behind a running client. One per `start()`.
struct Worker<T: Transport> {
    endpoint: Arc<Endpoint>,
    transport: Arc<T>,
    dispatch: Arc<Mutex<Dispatcher>>,
    state: Arc<watch::Sender<ConnectionState>>,
    backoff: BackoffSchedule,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
}

impl<T: Transport> Worker<T> {
    async fn run(mut self) {
        let name = self.endpoint.name;

        // Not cancellable: a later worker waits on this one in turn.
        if let Some(previous) = self.previous.take() {
            if let Err(e) = previous.await {
                tracing::error!("[{}] Previous worker panicked: {}", name, e);
            }
        }

        loop {
            if !self.set_state(ConnectionState::Connecting) {
                return;
            }
            tracing::info!("[{}] Connecting to {}", name, self.endpoint.url);

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                result = self.transport.connect(&self.endpoint.url) => result,
            };

            match connected {
                Ok(mut conn) => {
                    self.backoff.reset();
                    if !self.set_state(ConnectionState::Open) {
                        conn.close().await;
                        return;
                    }
                    tracing::info!("[{}] Connection open", name);

                    if self.pump(&mut conn).await {
                        conn.close().await;
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("[{}] Connect to {} failed: {:#}", name, self.endpoint.url, e);
                }
            }

            let delay = self.backoff.advance();
            if !self.set_state(ConnectionState::ClosedRetrying) {
                return;
            }
            tracing::info!("[{}] Closed, retrying in {:?}", name, delay);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read events until the connection closes. Returns true if the client
    /// was stopped instead.
    async fn pump(&self, conn: &mut T::Conn) -> bool {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return true,
                event = conn.next_event() => event,
            };

            match event {
                TransportEvent::Text(text) => self.handle_text(&text),
                TransportEvent::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => self.handle_text(&text),
                    Err(_) => tracing::warn!(
                        "[{}] Dropping frame: {}",
                        self.endpoint.name,
                        FrameError::NotText
                    ),
                },
                TransportEvent::Error(e) => {
                    tracing::error!("[{}] Transport error: {:#}", self.endpoint.name, e);
                }
                TransportEvent::Closed => return false,
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let name = self.endpoint.name;
        if text.is_empty() {
            return;
        }

        let frame = match telemetry::parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    "[{}] Dropping frame: {}, data: {}...",
                    name,
                    e,
                    telemetry::excerpt(text)
                );
                return;
            }
        };

        match frame.kind() {
            Some(kind) if kind == self.endpoint.kind => {
                let mut dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
                (*dispatch)(frame);
            }
            Some(kind) => {
                tracing::debug!("[{}] Ignoring {} frame", name, kind.wire_type());
            }
            None => tracing::debug!("[{}] Ignoring unrecognized frame", name),
        }
    }

    /// Publish a state change unless the client has been stopped. Returns
    /// false once stopped.
    fn set_state(&self, next: ConnectionState) -> bool {
        let cancel = &self.cancel;
        let mut live = false;
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() {
                return false;
            }
            live = true;
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        live
    }
}
