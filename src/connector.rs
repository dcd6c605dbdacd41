//! Scoped observe and control sessions
//!
//! [`CriConnector`] builds passive or active sessions against one
//! controller endpoint. An observe session only reads state; a control
//! session holds exclusive motion authority from the moment the controller
//! acknowledges the request until the session is closed or dropped.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::error::{CriError, Result};
use crate::protocol;
use crate::session::{CommandEvent, CommandEventKind, Session};
use crate::state::RobotState;

/// Options for motion commands
#[derive(Debug, Clone, Copy)]
pub struct MoveOptions {
    /// Block until the controller reports motion completion
    pub wait_move_finished: bool,
    /// Upper bound for the completion wait
    pub move_finished_timeout: Duration,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            wait_move_finished: false,
            move_finished_timeout: Duration::from_secs(30),
        }
    }
}

impl MoveOptions {
    /// Wait for completion, bounded by `timeout`
    pub fn wait(timeout: Duration) -> Self {
        Self {
            wait_move_finished: true,
            move_finished_timeout: timeout,
        }
    }
}

/// Factory for observe and control sessions against one controller endpoint
pub struct CriConnector {
    config: ConnectorConfig,
}

impl CriConnector {
    /// Connector for the given controller endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            config: ConnectorConfig::new(host, port),
        }
    }

    /// Connector with explicit connection tuning
    pub fn with_config(config: ConnectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Open a read-only session: state visibility without control authority
    pub async fn observe(&self) -> Result<ObserveSession> {
        let session = Session::connect(&self.config).await?;
        session
            .wait_for_state(self.config.connection().state_timeout())
            .await?;

        info!(
            "Observe session established with {}:{}",
            self.config.host, self.config.port
        );
        Ok(ObserveSession { session })
    }

    /// Open a session holding exclusive control of the robot
    ///
    /// Fails with [`CriError::ControlDenied`] when the controller refuses
    /// the request, for example because another client is active.
    pub async fn control(&self) -> Result<ControlSession> {
        let session = Session::connect(&self.config).await?;
        let tuning = self.config.connection();
        session.wait_for_state(tuning.state_timeout()).await?;

        let mut events = session.subscribe_events();
        let id = session.send_command(protocol::set_active(true)).await?;
        match await_ack(&mut events, id, tuning.command_ack_timeout()).await {
            Ok(()) => {}
            Err(CriError::CommandRejected { reason, .. }) => {
                return Err(CriError::ControlDenied(reason));
            }
            Err(e) => return Err(e),
        }

        info!(
            "Control session established with {}:{}",
            self.config.host, self.config.port
        );
        Ok(ControlSession {
            session,
            released: false,
        })
    }
}

/// Read-only view of the controller state
pub struct ObserveSession {
    session: Session,
}

impl ObserveSession {
    /// Latest state snapshot (non-blocking)
    pub fn robot_state(&self) -> RobotState {
        self.session.state()
    }

    /// Wait for the next STATUS broadcast; `None` once the connection is gone
    pub async fn next_state(&mut self) -> Option<RobotState> {
        self.session.next_state().await
    }

    /// Disconnect from the controller
    pub fn close(self) {
        debug!("Observe session closed");
    }
}

/// Exclusive motion-command authority over the robot
///
/// Dropping the session posts a best-effort control release; prefer
/// [`ControlSession::close`] for an acknowledged release.
pub struct ControlSession {
    session: Session,
    released: bool,
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ControlSession {
    /// Latest state snapshot (non-blocking)
    pub fn robot_state(&self) -> RobotState {
        self.session.state()
    }

    /// Wait for the next STATUS broadcast; `None` once the connection is gone
    pub async fn next_state(&mut self) -> Option<RobotState> {
        self.session.next_state().await
    }

    /// Set the motion speed override in percent
    pub async fn set_override(&mut self, percent: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(CriError::Parameter(format!(
                "Override must be within 0..=100 percent, got {}",
                percent
            )));
        }

        self.acknowledged_command(protocol::set_override(percent))
            .await?;
        debug!("Override set to {:.1}%", percent);
        Ok(())
    }

    /// Move relative to the current pose in the base coordinate system
    ///
    /// `delta` is [x, y, z, a, b, c] in mm and degrees, `external_axes` the
    /// three external axis deltas, `velocity` in mm/s. With
    /// `options.wait_move_finished` the call blocks until the controller
    /// reports completion, bounded by `options.move_finished_timeout`.
    pub async fn move_base_relative(
        &mut self,
        delta: [f64; 6],
        external_axes: [f64; 3],
        velocity: f64,
        options: MoveOptions,
    ) -> Result<()> {
        if velocity <= 0.0 {
            return Err(CriError::Parameter(format!(
                "Velocity must be positive, got {}",
                velocity
            )));
        }

        let mut events = self.session.subscribe_events();
        let body = protocol::move_relative_base(delta, external_axes, velocity);
        let id = self.session.send_command(body).await?;
        await_ack(&mut events, id, self.ack_timeout()).await?;

        if options.wait_move_finished {
            await_motion_end(&mut events, id, options.move_finished_timeout).await?;
            debug!("Motion command {} finished", id);
        }

        Ok(())
    }

    /// Stop any running motion
    pub async fn stop_motion(&mut self) -> Result<()> {
        self.acknowledged_command(protocol::stop_motion()).await
    }

    /// Release control and disconnect, waiting for the controller to
    /// acknowledge the release
    pub async fn close(mut self) -> Result<()> {
        self.released = true;

        let mut events = self.session.subscribe_events();
        let id = self.session.send_command(protocol::set_active(false)).await?;
        if let Err(e) = await_ack(&mut events, id, self.ack_timeout()).await {
            warn!("Control release was not acknowledged: {}", e);
        }

        info!("Control released");
        Ok(())
    }

    fn ack_timeout(&self) -> Duration {
        self.session.config().connection().command_ack_timeout()
    }

    async fn acknowledged_command(&mut self, body: String) -> Result<()> {
        let mut events = self.session.subscribe_events();
        let id = self.session.send_command(body).await?;
        await_ack(&mut events, id, self.ack_timeout()).await
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.session.post_command(&protocol::set_active(false)).is_some() {
            debug!("Posted control release while dropping the session");
        } else {
            warn!("Could not post control release while dropping the session");
        }
    }
}

async fn await_ack(
    events: &mut broadcast::Receiver<CommandEvent>,
    id: u32,
    timeout: Duration,
) -> Result<()> {
    let deadline = time::Instant::now() + timeout;

    loop {
        let event = next_event(events, deadline)
            .await?
            .ok_or_else(|| CriError::Timeout(format!("acknowledgement of command {}", id)))?;
        if event.id != id {
            continue;
        }
        match event.kind {
            CommandEventKind::Accepted => return Ok(()),
            CommandEventKind::Rejected(reason) => {
                return Err(CriError::CommandRejected { id, reason });
            }
            _ => {}
        }
    }
}

async fn await_motion_end(
    events: &mut broadcast::Receiver<CommandEvent>,
    id: u32,
    timeout: Duration,
) -> Result<()> {
    let deadline = time::Instant::now() + timeout;

    loop {
        let event = next_event(events, deadline)
            .await?
            .ok_or(CriError::MotionTimeout {
                id,
                timeout_ms: timeout.as_millis() as u64,
            })?;
        if event.id != id {
            continue;
        }
        match event.kind {
            CommandEventKind::MotionFinished => return Ok(()),
            CommandEventKind::MotionFailed(reason) => {
                return Err(CriError::MotionFailed { id, reason });
            }
            _ => {}
        }
    }
}

/// Next command event before `deadline`; `None` on timeout
async fn next_event(
    events: &mut broadcast::Receiver<CommandEvent>,
    deadline: time::Instant,
) -> Result<Option<CommandEvent>> {
    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => return Ok(Some(event)),
            Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                warn!("Command event subscriber lagged by {} events", missed);
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                return Err(CriError::Connection(
                    "Session closed while waiting for command events".to_string(),
                ));
            }
            Err(_) => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::protocol::MessageParser;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum MockBehavior {
        Normal,
        DenyControl,
        NeverFinishesMotion,
    }

    /// Controller stand-in: accepts connections, streams one STATUS frame,
    /// acknowledges commands and (normally) completes motion commands.
    struct MockRobot {
        addr: SocketAddr,
        commands: mpsc::UnboundedReceiver<String>,
    }

    const MOCK_STATUS: &str = "STATUS MODE joint \
        POSJOINTSETPOINT 0 0 0 0 0 0 0 0 0 \
        POSJOINTCURRENT 0 0 0 0 0 0 0 0 0 \
        POSCARTROBOT 250.0 0.0 200.0 0.0 90.0 0.0 \
        OVERRIDE 80.0 DIN 0 DOUT 0 ESTOP 0 SUPPLY 24.0 \
        KINSTATE 0 OPMODE 0 CARTSPEED 0.0 ERROR no_error";

    async fn spawn_mock_robot(behavior: MockBehavior) -> MockRobot {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_client(stream, command_tx.clone(), behavior));
            }
        });

        MockRobot {
            addr,
            commands: command_rx,
        }
    }

    async fn handle_client(
        mut stream: TcpStream,
        commands: mpsc::UnboundedSender<String>,
        behavior: MockBehavior,
    ) {
        let parser = MessageParser::new().unwrap();
        let mut counter = 0u32;
        let mut buffer = String::new();
        let mut chunk = [0u8; 1024];

        counter += 1;
        stream
            .write_all(protocol::frame(counter, MOCK_STATUS).as_bytes())
            .await
            .unwrap();

        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));

            for (id, body) in parser.drain_frames(&mut buffer) {
                if body.starts_with("ALIVEJOG") {
                    continue;
                }
                commands.send(body.clone()).ok();

                let deny =
                    behavior == MockBehavior::DenyControl && body == "CMD Active true";
                counter += 1;
                let reply = if deny {
                    protocol::frame(
                        counter,
                        &format!("CMDERROR {} active control held by another client", id),
                    )
                } else {
                    protocol::frame(counter, &format!("CMDACK {}", id))
                };
                if stream.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }

                if body.starts_with("CMD Move RelativeBase")
                    && behavior != MockBehavior::NeverFinishesMotion
                {
                    counter += 1;
                    let done = protocol::frame(counter, &format!("EXECEND {}", id));
                    if stream.write_all(done.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn test_config(addr: SocketAddr) -> ConnectorConfig {
        ConnectorConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            connection: Some(ConnectionConfig {
                connect_timeout_ms: Some(1_000),
                state_timeout_ms: Some(1_000),
                command_ack_timeout_ms: Some(1_000),
                keepalive_interval_ms: Some(20),
            }),
        }
    }

    async fn collect_commands(mock: &mut MockRobot, until: &str) -> Vec<String> {
        let mut seen = Vec::new();
        while seen.last().map(String::as_str) != Some(until) {
            match time::timeout(Duration::from_secs(2), mock.commands.recv()).await {
                Ok(Some(command)) => seen.push(command),
                _ => break,
            }
        }
        seen
    }

    #[tokio::test]
    async fn observe_then_control_runs_the_demo_sequence() {
        let mut mock = spawn_mock_robot(MockBehavior::Normal).await;
        let connector = CriConnector::with_config(test_config(mock.addr));

        let observer = connector.observe().await.unwrap();
        let state = observer.robot_state();
        assert_eq!(state.mode, "joint");
        assert_eq!(state.override_percent, 80.0);
        assert!(state.sequence > 0);
        observer.close();

        let mut controller = connector.control().await.unwrap();
        controller.set_override(100.0).await.unwrap();
        controller
            .move_base_relative(
                [20.0, 20.0, 20.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                10.0,
                MoveOptions::wait(Duration::from_millis(1000)),
            )
            .await
            .unwrap();
        controller
            .move_base_relative(
                [-20.0, -20.0, -20.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                10.0,
                MoveOptions::wait(Duration::from_millis(1000)),
            )
            .await
            .unwrap();
        controller.close().await.unwrap();

        // the observe session must not have issued any command, and the
        // control session must have released on exit
        let seen = collect_commands(&mut mock, "CMD Active false").await;
        assert_eq!(
            seen,
            vec![
                "CMD Active true".to_string(),
                "CMD Override 100.0".to_string(),
                "CMD Move RelativeBase 20.000 20.000 20.000 0.000 0.000 0.000 \
                 0.000 0.000 0.000 10.0"
                    .to_string(),
                "CMD Move RelativeBase -20.000 -20.000 -20.000 0.000 0.000 0.000 \
                 0.000 0.000 0.000 10.0"
                    .to_string(),
                "CMD Active false".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn control_is_denied_when_another_client_is_active() {
        let mock = spawn_mock_robot(MockBehavior::DenyControl).await;
        let connector = CriConnector::with_config(test_config(mock.addr));

        let err = connector.control().await.unwrap_err();
        match err {
            CriError::ControlDenied(reason) => {
                assert!(reason.contains("another client"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn bounded_motion_wait_times_out_without_completion() {
        let mock = spawn_mock_robot(MockBehavior::NeverFinishesMotion).await;
        let connector = CriConnector::with_config(test_config(mock.addr));
        let mut controller = connector.control().await.unwrap();

        // without a completion wait the acknowledgement is enough
        controller
            .move_base_relative(
                [5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                10.0,
                MoveOptions::default(),
            )
            .await
            .unwrap();

        let err = controller
            .move_base_relative(
                [5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                10.0,
                MoveOptions::wait(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CriError::MotionTimeout { timeout_ms: 100, .. }
        ));

        // the session stays usable after a timed-out wait
        controller.stop_motion().await.unwrap();
        controller.close().await.unwrap();
    }

    #[tokio::test]
    async fn parameters_are_validated_before_hitting_the_wire() {
        let mut mock = spawn_mock_robot(MockBehavior::Normal).await;
        let connector = CriConnector::with_config(test_config(mock.addr));
        let mut controller = connector.control().await.unwrap();

        assert!(matches!(
            controller.set_override(150.0).await,
            Err(CriError::Parameter(_))
        ));
        assert!(matches!(
            controller
                .move_base_relative(
                    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    [0.0, 0.0, 0.0],
                    0.0,
                    MoveOptions::default(),
                )
                .await,
            Err(CriError::Parameter(_))
        ));

        controller.close().await.unwrap();

        let seen = collect_commands(&mut mock, "CMD Active false").await;
        assert_eq!(
            seen,
            vec!["CMD Active true".to_string(), "CMD Active false".to_string()]
        );
    }
}
