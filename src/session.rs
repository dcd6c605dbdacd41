//! CRI session transport
//!
//! Owns the TCP connection to the controller and the background tasks that
//! service it: a reader task that turns incoming frames into state updates
//! and command events, a writer task that serializes outgoing frames, and
//! a keepalive task that keeps the session alive with zero jog messages.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::config::ConnectorConfig;
use crate::error::{CriError, Result};
use crate::protocol::{self, Message, MessageCounter, MessageParser};
use crate::state::RobotState;

/// Outgoing frames queued between callers and the writer task
const OUTGOING_QUEUE: usize = 64;

/// Command events buffered for slow subscribers
const EVENT_QUEUE: usize = 64;

/// Acknowledgement or completion event tied to a command counter id
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub id: u32,
    pub kind: CommandEventKind,
}

#[derive(Debug, Clone)]
pub enum CommandEventKind {
    Accepted,
    Rejected(String),
    MotionFinished,
    MotionFailed(String),
}

/// One open connection to the controller
///
/// Dropping the session aborts the reader and keepalive tasks; the writer
/// task drains the outgoing queue first, so frames posted right before the
/// drop still reach the wire.
pub(crate) struct Session {
    config: ConnectorConfig,
    outgoing: mpsc::Sender<String>,
    counter: Arc<MessageCounter>,
    state_rx: watch::Receiver<RobotState>,
    events_tx: broadcast::Sender<CommandEvent>,
    reader_task: JoinHandle<()>,
    keepalive_task: JoinHandle<()>,
    _writer_task: JoinHandle<()>,
}

impl Session {
    pub(crate) async fn connect(config: &ConnectorConfig) -> Result<Self> {
        let tuning = config.connection();
        let endpoint = (config.host.as_str(), config.port);

        let stream = time::timeout(tuning.connect_timeout(), TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                CriError::Connection(format!(
                    "Connecting to {}:{} timed out",
                    config.host, config.port
                ))
            })?
            .map_err(|e| {
                CriError::Connection(format!(
                    "Failed to connect to {}:{}: {}",
                    config.host, config.port, e
                ))
            })?;
        stream.set_nodelay(true)?;

        let parser = MessageParser::new()?;
        let (read_half, write_half) = stream.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE);
        let (state_tx, state_rx) = watch::channel(RobotState::default());
        let (events_tx, _) = broadcast::channel(EVENT_QUEUE);
        let counter = Arc::new(MessageCounter::new());

        let reader_task = tokio::spawn(read_loop(read_half, parser, state_tx, events_tx.clone()));
        let writer_task = tokio::spawn(write_loop(write_half, outgoing_rx));
        let keepalive_task = tokio::spawn(keepalive_loop(
            outgoing_tx.clone(),
            counter.clone(),
            tuning.keepalive_interval(),
        ));

        debug!("CRI session opened to {}:{}", config.host, config.port);

        Ok(Self {
            config: config.clone(),
            outgoing: outgoing_tx,
            counter,
            state_rx,
            events_tx,
            reader_task,
            keepalive_task,
            _writer_task: writer_task,
        })
    }

    pub(crate) fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Latest state snapshot (non-blocking)
    pub(crate) fn state(&self) -> RobotState {
        self.state_rx.borrow().clone()
    }

    /// Wait for the next STATUS broadcast
    pub(crate) async fn next_state(&mut self) -> Option<RobotState> {
        self.state_rx.changed().await.ok()?;
        Some(self.state_rx.borrow().clone())
    }

    /// Subscribe to command events
    ///
    /// Subscribe before sending the command the events are awaited for,
    /// otherwise the acknowledgement can be missed.
    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<CommandEvent> {
        self.events_tx.subscribe()
    }

    /// Queue a command frame and return its counter id
    pub(crate) async fn send_command(&self, body: String) -> Result<u32> {
        let id = self.counter.next();
        let frame = protocol::frame(id, &body);
        trace!("-> {}", frame.trim_end());
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| CriError::Connection("Session writer is gone".to_string()))?;
        Ok(id)
    }

    /// Best-effort command for drop paths
    ///
    /// Returns the counter id if the frame could be queued.
    pub(crate) fn post_command(&self, body: &str) -> Option<u32> {
        let id = self.counter.next();
        let frame = protocol::frame(id, body);
        self.outgoing.try_send(frame).ok().map(|_| id)
    }

    /// Block until the controller has reported its state at least once
    pub(crate) async fn wait_for_state(&self, timeout: Duration) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        let deadline = time::Instant::now() + timeout;

        loop {
            if state_rx.borrow().sequence > 0 {
                return Ok(());
            }
            match time::timeout_at(deadline, state_rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(CriError::Connection(
                        "Connection closed before the first STATUS broadcast".to_string(),
                    ))
                }
                Err(_) => return Err(CriError::Timeout("the first STATUS broadcast".to_string())),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.keepalive_task.abort();
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    parser: MessageParser,
    state_tx: watch::Sender<RobotState>,
    events_tx: broadcast::Sender<CommandEvent>,
) {
    let mut buffer = String::new();
    let mut chunk = [0u8; 4096];
    let mut sequence: u64 = 0;

    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!("Controller closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Read error on CRI session: {}", e);
                break;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));

        for (counter, body) in parser.drain_frames(&mut buffer) {
            match protocol::parse_body(&body) {
                Ok(Message::Status(mut state)) => {
                    sequence += 1;
                    state.sequence = sequence;
                    state.timestamp = unix_now();
                    if state_tx.send(state).is_err() {
                        return;
                    }
                }
                Ok(Message::CommandAck { id }) => {
                    publish(&events_tx, id, CommandEventKind::Accepted);
                }
                Ok(Message::CommandRejected { id, reason }) => {
                    publish(&events_tx, id, CommandEventKind::Rejected(reason));
                }
                Ok(Message::MotionFinished { id }) => {
                    publish(&events_tx, id, CommandEventKind::MotionFinished);
                }
                Ok(Message::MotionFailed { id, reason }) => {
                    publish(&events_tx, id, CommandEventKind::MotionFailed(reason));
                }
                Ok(Message::Info(text)) => debug!("Controller message: {}", text),
                Ok(Message::Keepalive) => trace!("Keepalive echo"),
                Ok(Message::Unknown(kind)) => {
                    trace!("Ignoring {} message (frame {})", kind, counter);
                }
                Err(e) => warn!("Dropping frame {}: {}", counter, e),
            }
        }
    }
}

fn publish(events_tx: &broadcast::Sender<CommandEvent>, id: u32, kind: CommandEventKind) {
    // a send error only means nobody is currently waiting on events
    let _ = events_tx.send(CommandEvent { id, kind });
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut outgoing: mpsc::Receiver<String>) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = write_half.write_all(frame.as_bytes()).await {
            warn!("Write error on CRI session: {}", e);
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn keepalive_loop(
    outgoing: mpsc::Sender<String>,
    counter: Arc<MessageCounter>,
    period: Duration,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let frame = protocol::frame(counter.next(), &protocol::alive_jog());
        if outgoing.send(frame).await.is_err() {
            break;
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
