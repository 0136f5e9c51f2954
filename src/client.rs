//! Client builder and connection supervisor.
//!
//! The [`ClientBuilder`] collects configuration and handlers. The
//! [`Client`] owns one coordinator session:
//! 1. Connect over TCP
//! 2. Send the version byte and `ClientHello`, wait for `ServerHello`
//! 3. Run the reader, writer, dispatcher and heartbeat tasks
//! 4. Tear everything down when any of them ends, and report a [`Termination`]
//!
//! # Example
//!
//! ```no_run
//! use elko_client::{ClientBuilder, ClientConfig};
//!
//! # async fn example() -> elko_client::Result<()> {
//! let client = ClientBuilder::new(ClientConfig::new("billing"))
//!     .handle("echo", |data: String, ctx| async move {
//!         ctx.respond(&data).await
//!     })
//!     .connect()
//!     .await?;
//!
//! let termination = client.wait().await;
//! std::process::exit(termination.exit_code());
//! # }
//! ```

use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::MsgPackCodec;
use crate::config::ClientConfig;
use crate::connection::{Connection, HandshakeOutcome};
use crate::context::Context;
use crate::error::{ElkoError, Result};
use crate::handler::{Dispatcher, HandlerRegistry, HandlerResult, RequestContext};
use crate::pending::PendingRequests;
use crate::protocol::{
    ClientHello, ClientMessage, ClientRequest, IntegrityKey, LogEntry, ServerRequest, Shutdown,
    LOG_SERVICE,
};
use crate::queue::Queue;
use crate::reader::{read_loop, ReadOutcome, ReaderRoutes};
use crate::state::{ConnectionState, StateMachine};
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriteOutcome, WriterHandle};

/// How long the writer may keep flushing queued frames during teardown.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// How a session ended.
#[derive(Debug)]
pub enum Termination {
    /// The coordinator sent `ServerShutdown`.
    RemoteShutdown { reason: String },
    /// The coordinator closed the socket on a frame boundary.
    RemoteClosed,
    /// This side asked to shut down.
    LocalShutdown,
    /// Transport, integrity or background task failure.
    Failed(ElkoError),
}

impl Termination {
    /// Process exit code for this outcome: `0` when clean, `1` on failure.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }

    pub fn is_clean(&self) -> bool {
        !matches!(self, Termination::Failed(_))
    }
}

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    config: ClientConfig,
    registry: HandlerRegistry,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
        }
    }

    /// Builder for `service_id` with configuration taken from the environment.
    pub fn from_env(service_id: impl Into<String>) -> Result<Self> {
        Ok(Self::new(ClientConfig::from_env(service_id)?))
    }

    /// Replace the handler registry.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a handler for coordinator requests to `method`.
    ///
    /// Arguments are MsgPack-decoded into `T` before the handler runs.
    pub fn handle<F, T, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(method, handler);
        self
    }

    /// Register a handler that receives the raw argument bytes.
    pub fn handle_raw<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Bytes, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_raw(method, handler);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn instance_id(mut self, instance_id: u64) -> Self {
        self.config.instance_id = Some(instance_id);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Whether to wait for `ServerHello` before entering `Ready`.
    ///
    /// Default: `true`
    pub fn await_server_hello(mut self, wait: bool) -> Self {
        self.config.await_server_hello = wait;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Heartbeat interval; `None` disables heartbeats.
    ///
    /// Default: 5 seconds
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Maximum silence from the coordinator before the session fails.
    ///
    /// Default: disabled
    pub fn liveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.liveness_timeout = timeout;
        self
    }

    /// Depth limit of the outgoing queue; `None` for unbounded.
    ///
    /// Default: 1024
    pub fn max_outgoing(mut self, limit: Option<usize>) -> Self {
        self.config.max_outgoing = limit;
        self
    }

    /// How long a send waits for outgoing queue space.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout = timeout;
        self
    }

    /// Set the maximum number of concurrent handlers.
    ///
    /// Requests over the limit are answered with an `Overloaded` error.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.config.max_payload_size = max;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the configured coordinator and start the session.
    ///
    /// Returns once the session is `Ready`, or with the handshake outcome
    /// already recorded if the coordinator shut down during the handshake.
    pub async fn connect(self) -> Result<Client> {
        self.config.validate()?;
        let state = StateMachine::new();
        state.transition(ConnectionState::Connecting)?;

        let endpoint = self.config.endpoint();
        info!(%endpoint, service_id = %self.config.service_id, "Connecting to coordinator");

        match transport::connect(&endpoint, self.config.connect_timeout).await {
            Ok(stream) => self.start(stream, state).await,
            Err(e) => {
                error!(%endpoint, error = %e, "Connect failed");
                close_state(&state);
                Err(e)
            }
        }
    }

    /// Start a session over an already connected stream.
    pub async fn connect_with<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.config.validate()?;
        let state = StateMachine::new();
        state.transition(ConnectionState::Connecting)?;
        self.start(stream, state).await
    }

    async fn start<S>(self, stream: S, state: StateMachine) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let ClientBuilder { config, registry } = self;
        let key = Arc::new(IntegrityKey::derive(&config.service_id));

        let shared = Arc::new(Shared::new(&config, key.clone(), state));

        shared.state.transition(ConnectionState::Handshaking)?;
        let mut connection = Connection::new(stream, key.clone(), config.max_payload_size);
        let hello = ClientHello::new(config.service_id.clone(), config.instance_id);
        let await_hello = config
            .await_server_hello
            .then_some(config.handshake_timeout);

        let outcome = match connection.handshake(&key, &hello, await_hello).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Handshake failed");
                shared.close_queues();
                close_state(&shared.state);
                return Err(e);
            }
        };

        if let HandshakeOutcome::Shutdown(shutdown) = outcome {
            shared.close_queues();
            close_state(&shared.state);
            let termination = Termination::RemoteShutdown {
                reason: shutdown.reason,
            };
            return Ok(Client {
                handle: ClientHandle { shared },
                driver: tokio::spawn(async move { termination }),
            });
        }

        shared.state.transition(ConnectionState::Ready)?;
        info!(service_id = %config.service_id, "Session ready");

        let (read_half, write_half, buffer) = connection.into_parts();
        let writer = spawn_writer_task(shared.outgoing.clone(), write_half);
        let reader = tokio::spawn(read_loop(
            read_half,
            buffer,
            ReaderRoutes {
                pending: shared.pending.clone(),
                incoming: shared.incoming.clone(),
            },
            config.liveness_timeout,
        ));

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            registry: Arc::new(registry),
            writer: shared.writer.clone(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_handlers)),
            shutdown: shared.shutdown.clone(),
            failures: failures_tx,
        };
        let dispatcher = tokio::spawn(dispatcher.run(shared.incoming.clone()));

        let heartbeat = config
            .heartbeat_interval
            .map(|interval| tokio::spawn(heartbeat_loop(shared.writer.clone(), interval)));

        let tasks = Tasks {
            reader,
            writer,
            dispatcher,
            heartbeat,
        };
        let driver = tokio::spawn(supervise(shared.clone(), tasks, failures_rx));

        Ok(Client {
            handle: ClientHandle { shared },
            driver,
        })
    }
}

/// State shared between the client handles and the session tasks.
struct Shared {
    writer: WriterHandle,
    outgoing: Arc<Queue<OutboundFrame>>,
    incoming: Arc<Queue<ServerRequest>>,
    pending: Arc<PendingRequests>,
    state: StateMachine,
    next_id: AtomicU64,
    service_id: String,
    instance_id: Option<u64>,
    /// Parent token of every handler context.
    shutdown: CancellationToken,
    local_shutdown: AtomicBool,
}

impl Shared {
    fn new(config: &ClientConfig, key: Arc<IntegrityKey>, state: StateMachine) -> Self {
        let outgoing = Arc::new(Queue::new(config.max_outgoing, config.backpressure_timeout));
        Self {
            writer: WriterHandle::new(outgoing.clone(), key),
            outgoing,
            incoming: Arc::new(Queue::unbounded()),
            pending: Arc::new(PendingRequests::new()),
            state,
            next_id: AtomicU64::new(1),
            service_id: config.service_id.clone(),
            instance_id: config.instance_id,
            shutdown: CancellationToken::new(),
            local_shutdown: AtomicBool::new(false),
        }
    }

    /// Correlation ids start at 1; `0` marks fire-and-forget.
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn close_queues(&self) {
        self.incoming.close();
        self.outgoing.close();
    }
}

/// A running coordinator session.
pub struct Client {
    handle: ClientHandle,
    driver: JoinHandle<Termination>,
}

impl Client {
    /// Cloneable handle for issuing requests and requesting shutdown.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.handle.subscribe_state()
    }

    /// Wait until the session ends.
    pub async fn wait(self) -> Termination {
        match self.driver.await {
            Ok(termination) => termination,
            Err(e) => Termination::Failed(task_failed("supervisor", e)),
        }
    }
}

/// Handle for talking to the coordinator from application code.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Root context with no deadline, labelled with a fresh id.
    pub fn context(&self) -> Context {
        Context::new(self.shared.allocate_id())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Send a request to `service` and decode the response into `R`.
    pub async fn request<A, R>(&self, ctx: &Context, service: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = MsgPackCodec::encode_bytes(args)?;
        let result = self.request_raw(ctx, service, args).await?;
        MsgPackCodec::decode(&result)
    }

    /// Send a request with pre-encoded arguments and return the raw result.
    ///
    /// The wait is bounded by `ctx`; a response arriving after the deadline
    /// or after cancellation is discarded. Every call gets its own
    /// correlation id, whatever context it runs under.
    pub async fn request_raw(&self, ctx: &Context, service: &str, args: Bytes) -> Result<Bytes> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.ensure_ready()?;

        let id = self.shared.allocate_id();
        let pending = &self.shared.pending;
        let rx = pending.register(id)?;
        let message = ClientMessage::Request(ClientRequest {
            id,
            service: service.to_string(),
            args,
        });

        let sent = tokio::select! {
            sent = self.shared.writer.send(&message) => sent,
            err = ctx.done() => Err(err),
        };
        if let Err(e) = sent {
            pending.remove(id);
            return Err(e);
        }
        trace!(request_id = id, context = ctx.id(), service, "Request queued");

        pending.wait(ctx, id, rx).await
    }

    /// Send a request that expects no response.
    pub async fn fire<A: Serialize + ?Sized>(&self, service: &str, args: &A) -> Result<()> {
        self.ensure_ready()?;
        let message = ClientMessage::Request(ClientRequest {
            id: 0,
            service: service.to_string(),
            args: MsgPackCodec::encode_bytes(args)?,
        });
        self.shared.writer.send(&message).await
    }

    /// Fire `message` at the coordinator's log service.
    pub async fn log(&self, ctx: &Context, message: &str) -> Result<()> {
        self.persist(ctx, LogEntry::new(message)).await
    }

    /// Log a message with a MsgPack-encoded attachment.
    pub async fn log_data<D>(&self, ctx: &Context, message: &str, data: &D) -> Result<()>
    where
        D: Serialize + ?Sized,
    {
        let mut entry = LogEntry::new(message);
        entry.data = Some(MsgPackCodec::encode_bytes(data)?);
        self.persist(ctx, entry).await
    }

    /// Log an error, recording the caller's file and line.
    #[track_caller]
    pub fn log_error<'a>(
        &'a self,
        ctx: &'a Context,
        message: &str,
    ) -> impl Future<Output = Result<()>> + 'a {
        let entry = LogEntry::new(message).error_at(Location::caller());
        self.persist(ctx, entry)
    }

    async fn persist(&self, ctx: &Context, mut entry: LogEntry) -> Result<()> {
        entry.context = ctx.id().to_string();
        entry.service_id = self.shared.service_id.clone();
        entry.instance_id = self.shared.instance_id;
        self.fire(LOG_SERVICE, &entry).await
    }

    /// Ask the coordinator to end the session.
    ///
    /// `ClientShutdown` is queued behind frames already waiting and skips
    /// the depth limit. Calling this more than once has no further effect.
    pub fn shutdown(&self, reason: &str) -> Result<()> {
        if self.shared.local_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(reason, "Requesting shutdown");
        // Already closing when the session ended first.
        let _ = self.shared.state.transition(ConnectionState::Closing);
        self.shared
            .writer
            .send_control(&ClientMessage::Shutdown(Shutdown::new(reason)))
    }

    /// Whether the outgoing queue is at its depth limit.
    pub fn is_backpressure_active(&self) -> bool {
        self.shared.writer.is_backpressure_active()
    }

    /// Frames queued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.shared.writer.pending_count()
    }

    /// Worker-issued requests still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.shared.state.current() {
            ConnectionState::Ready => Ok(()),
            _ => Err(ElkoError::ConnectionClosed),
        }
    }
}

struct Tasks {
    reader: JoinHandle<Result<ReadOutcome>>,
    writer: JoinHandle<Result<WriteOutcome>>,
    dispatcher: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Which task ended the session.
enum Exit {
    Reader(Result<ReadOutcome>),
    Writer(Result<WriteOutcome>),
    Dispatcher(std::result::Result<(), JoinError>),
    Handler(ElkoError),
}

/// Wait for the first task to end, then tear the session down.
async fn supervise(
    shared: Arc<Shared>,
    mut tasks: Tasks,
    mut failures: mpsc::UnboundedReceiver<ElkoError>,
) -> Termination {
    let exit = tokio::select! {
        result = &mut tasks.reader => Exit::Reader(joined("reader", result)),
        result = &mut tasks.writer => Exit::Writer(joined("writer", result)),
        result = &mut tasks.dispatcher => Exit::Dispatcher(result),
        Some(err) = failures.recv() => Exit::Handler(err),
    };

    let local = shared.local_shutdown.load(Ordering::Acquire);
    let mut dispatcher_done = false;
    let (termination, reader_done, writer_done) = match exit {
        Exit::Reader(Ok(ReadOutcome::RemoteShutdown(shutdown))) => (
            Termination::RemoteShutdown {
                reason: shutdown.reason,
            },
            true,
            false,
        ),
        Exit::Reader(Ok(ReadOutcome::RemoteClosed)) if local => {
            (Termination::LocalShutdown, true, false)
        }
        Exit::Reader(Ok(ReadOutcome::RemoteClosed)) => (Termination::RemoteClosed, true, false),
        Exit::Reader(Err(e)) => (Termination::Failed(e), true, false),
        Exit::Writer(Ok(_)) => (Termination::LocalShutdown, false, true),
        Exit::Writer(Err(e)) => (Termination::Failed(e), false, true),
        Exit::Dispatcher(result) => {
            dispatcher_done = true;
            let err = match result {
                Ok(()) => ElkoError::TaskFailed("dispatcher task stopped".into()),
                Err(e) => task_failed("dispatcher", e),
            };
            (Termination::Failed(err), false, false)
        }
        Exit::Handler(e) => (Termination::Failed(e), false, false),
    };

    if let Termination::Failed(e) = &termination {
        error!(error = %e, "Session failed");
    }

    if !shared.state.current().is_terminal() && shared.state.current() != ConnectionState::Closing {
        let _ = shared.state.transition(ConnectionState::Closing);
    }

    shared.shutdown.cancel();
    shared.close_queues();
    shared.pending.fail_all();

    if let Some(heartbeat) = tasks.heartbeat.take() {
        heartbeat.abort();
    }
    if !reader_done {
        tasks.reader.abort();
    }
    if !writer_done {
        // Let responses that are already queued reach the socket.
        match tokio::time::timeout(WRITER_DRAIN_GRACE, &mut tasks.writer).await {
            Ok(result) => debug!(outcome = ?joined("writer", result).ok(), "Writer drained"),
            Err(_) => {
                warn!("Writer did not drain in time");
                tasks.writer.abort();
            }
        }
    }
    if !dispatcher_done {
        tasks.dispatcher.abort();
    }

    let _ = shared.state.transition(ConnectionState::Closed);
    info!(exit_code = termination.exit_code(), "Session closed");
    termination
}

/// Queue a heartbeat every `interval` until the outgoing queue closes.
async fn heartbeat_loop(writer: WriterHandle, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match writer.try_send(&ClientMessage::Heartbeat) {
            Ok(()) => trace!("Heartbeat queued"),
            Err(ElkoError::BackpressureTimeout) => {
                warn!("Outgoing queue full, skipping heartbeat");
            }
            Err(e) => {
                debug!(error = %e, "Heartbeat stopping");
                return;
            }
        }
    }
}

/// Move to `Closing` if needed, then to `Closed`.
fn close_state(state: &StateMachine) {
    if state.current() != ConnectionState::Closing {
        let _ = state.transition(ConnectionState::Closing);
    }
    let _ = state.transition(ConnectionState::Closed);
}

fn joined<T>(task: &str, result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.map_err(|e| task_failed(task, e))?
}

fn task_failed(task: &str, err: JoinError) -> ElkoError {
    if err.is_panic() {
        ElkoError::TaskFailed(format!("{} task panicked", task))
    } else {
        ElkoError::TaskFailed(format!("{} task cancelled", task))
    }
}

/// Connect with configuration from the environment and run until the
/// session ends.
///
/// Connection and handshake failures are reported as
/// [`Termination::Failed`].
pub async fn run(service_id: &str, registry: HandlerRegistry) -> Termination {
    let builder = match ClientBuilder::from_env(service_id) {
        Ok(builder) => builder.registry(registry),
        Err(e) => return Termination::Failed(e),
    };

    match builder.connect().await {
        Ok(client) => client.wait().await,
        Err(e) => Termination::Failed(e),
    }
}
