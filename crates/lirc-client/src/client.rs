//! Client session for talking to lircd.
//!
//! A [`LircClient`] owns one connection. A background reader task parses
//! everything the daemon sends: replies are handed to the command waiting
//! for them, pushed notifications (button presses, SIGHUP reloads) go out on
//! the event channel returned by [`LircClient::new`].
//!
//! Only one operation may run on a client at a time. A call made while
//! another is in progress fails with [`Error::Reentrancy`] instead of
//! queueing behind it.
//!
//! A command whose write fails or exceeds the send timeout may have left a
//! partial line on the socket. The session is then unusable: the call fails
//! with [`Error::ConnectionLost`], a [`LircEvent::Disconnected`] follows and
//! later commands fail the same way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::protocol::{
    ButtonInfo, Command, DecodedButton, Packet, ProtocolError, ResponsePacket, parse_key_line,
};
use crate::transport::{self, BoxedStream, DaemonStream, Endpoint, LircCodec, MAX_LINE_LENGTH};

/// Default time to wait for a command response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for writing one command line.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

const NO_DETAILS: &str = "command failed without further details";

/// Notification pushed by the daemon, or the end of the connection.
#[derive(Debug)]
pub enum LircEvent {
    /// An infrared button press was decoded.
    ButtonReceived(DecodedButton),
    /// lircd received SIGHUP and re-read its remote configurations.
    DaemonReloaded,
    /// The connection failed; no further events follow.
    Disconnected(Error),
}

pub type EventSender = mpsc::UnboundedSender<LircEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<LircEvent>;

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub response_timeout: Duration,
    pub send_timeout: Duration,
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }
}

type LineSink = FramedWrite<WriteHalf<BoxedStream>, LircCodec>;
type PacketStream = FramedRead<ReadHalf<BoxedStream>, LircCodec>;

struct Session {
    writer: LineSink,
    mailbox: Arc<Mailbox>,
    reader: JoinHandle<()>,
    /// Cancelled when a write fails. Part of a line may sit in `writer`,
    /// so the session must never write again.
    broken: CancellationToken,
}

enum SessionState {
    /// Not yet connected; holds the sender the reader task will take over.
    Idle(EventSender),
    Connected(Session),
    /// Disposed. The instance cannot be connected again.
    Closed,
}

impl SessionState {
    fn ensure_idle(&self) -> Result<()> {
        match self {
            SessionState::Idle(_) => Ok(()),
            SessionState::Connected(_) | SessionState::Closed => Err(Error::AlreadyConnected),
        }
    }

    fn take_events(&mut self) -> Result<EventSender> {
        match std::mem::replace(self, SessionState::Closed) {
            SessionState::Idle(events) => Ok(events),
            other => {
                *self = other;
                Err(Error::AlreadyConnected)
            }
        }
    }
}

/// Async client for a single lircd connection.
pub struct LircClient {
    config: ClientConfig,
    state: Mutex<SessionState>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl LircClient {
    /// Create an unconnected client and the receiver for its events.
    #[must_use]
    pub fn new(config: ClientConfig) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Self {
            config,
            state: Mutex::new(SessionState::Idle(events_tx)),
            connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };
        (client, events_rx)
    }

    /// Create a client and connect it to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the daemon cannot be reached.
    pub async fn connect_to(
        endpoint: &Endpoint,
        config: ClientConfig,
    ) -> Result<(Self, EventReceiver)> {
        let (client, events) = Self::new(config);
        client.connect(endpoint).await?;
        Ok((client, events))
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether [`connect`](Self::connect) succeeded and the client has not
    /// been disposed since. A lost connection is reported through
    /// [`LircEvent::Disconnected`] and does not clear this.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connect to lircd. A client can be connected once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] on a second attempt,
    /// [`Error::Reentrancy`] if another operation is running and
    /// [`Error::Connect`] if the socket cannot be opened. After a failed
    /// open the client may be connected again.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        let mut state = self.lock_state()?;
        state.ensure_idle()?;

        tracing::debug!("Connecting to lircd at {}", endpoint);
        let stream = transport::open(endpoint).await?;
        self.start(&mut state, stream)?;
        tracing::info!("Connected to lircd at {}", endpoint);
        Ok(())
    }

    /// Run the session over an already-open stream.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`connect`](Self::connect).
    // Async so the reader task is always spawned from inside a runtime
    #[allow(clippy::unused_async)]
    pub async fn connect_stream(&self, stream: impl DaemonStream) -> Result<()> {
        let mut state = self.lock_state()?;
        self.start(&mut state, Box::new(stream))
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state.try_lock().map_err(|_| Error::Reentrancy)
    }

    fn start(&self, state: &mut SessionState, stream: BoxedStream) -> Result<()> {
        let events = state.take_events()?;

        let (read_half, write_half) = tokio::io::split(stream);
        let packets = FramedRead::new(
            read_half,
            LircCodec::with_max_length(self.config.max_line_length),
        );
        let writer = FramedWrite::new(
            write_half,
            LircCodec::with_max_length(self.config.max_line_length),
        );

        let mailbox = Arc::new(Mailbox::new());
        let broken = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            packets,
            mailbox.clone(),
            events,
            self.cancel.clone(),
            broken.clone(),
        ));

        *state = SessionState::Connected(Session {
            writer,
            mailbox,
            reader,
            broken,
        });
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Query the daemon version.
    ///
    /// # Errors
    ///
    /// See [`Error`]; fails with [`ProtocolError::MissingData`] if the
    /// daemon sends no version line.
    pub async fn get_version(&self) -> Result<String> {
        let response = self.execute(Command::Version).await?;
        response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::MissingData.into())
    }

    /// List the remote controls configured on the daemon.
    ///
    /// # Errors
    ///
    /// See [`Error`].
    pub async fn list_remote_controls(&self) -> Result<Vec<String>> {
        let response = self.execute(Command::ListRemotes).await?;
        Ok(response.data)
    }

    /// List the buttons of one remote control.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Command`] if the daemon does not know `remote`.
    pub async fn list_remote_control_keys(&self, remote: &str) -> Result<Vec<ButtonInfo>> {
        let response = self
            .execute(Command::ListKeys {
                remote: remote.to_string(),
            })
            .await?;

        let keys = response
            .data
            .iter()
            .filter_map(|line| parse_key_line(remote, line).transpose())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Transmit a button press, repeated `repeats` more times.
    ///
    /// # Errors
    ///
    /// See [`Error`].
    pub async fn send_once(&self, remote: &str, button: &str, repeats: u32) -> Result<()> {
        self.execute(Command::SendOnce {
            remote: remote.to_string(),
            button: button.to_string(),
            repeats,
        })
        .await?;
        Ok(())
    }

    /// Start transmitting a button until [`send_stop`](Self::send_stop).
    ///
    /// # Errors
    ///
    /// See [`Error`].
    pub async fn send_start(&self, remote: &str, button: &str) -> Result<()> {
        self.execute(Command::SendStart {
            remote: remote.to_string(),
            button: button.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Stop a transmission begun with [`send_start`](Self::send_start).
    ///
    /// # Errors
    ///
    /// See [`Error`].
    pub async fn send_stop(&self, remote: &str, button: &str) -> Result<()> {
        self.execute(Command::SendStop {
            remote: remote.to_string(),
            button: button.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn execute(&self, command: Command) -> Result<ResponsePacket> {
        let mut state = self.lock_state()?;
        let SessionState::Connected(session) = &mut *state else {
            return Err(Error::NotConnected);
        };
        let Session {
            writer,
            mailbox,
            broken,
            ..
        } = session;

        if broken.is_cancelled() {
            return Err(Error::ConnectionLost);
        }

        let line = command.to_string();
        tracing::debug!("Sending command: {}", line);

        let exchange = async {
            mailbox.clear();

            let sent = tokio::time::timeout(self.config.send_timeout, writer.send(line.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        "Writing {:?} timed out after {:?}",
                        line,
                        self.config.send_timeout
                    );
                    Error::ConnectionLost
                })
                .and_then(|sent| sent.map_err(Error::from));
            if let Err(e) = sent {
                broken.cancel();
                return Err(e);
            }

            tokio::time::timeout(self.config.response_timeout, mailbox.recv())
                .await
                .map_err(|_| Error::Timeout(self.config.response_timeout))?
        };

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::ConnectionLost),
            response = exchange => response?,
        };

        if response.command != line {
            return Err(ProtocolError::CommandMismatch {
                sent: line,
                received: response.command,
            }
            .into());
        }

        if !response.success {
            let detail = response
                .data
                .into_iter()
                .next()
                .unwrap_or_else(|| NO_DETAILS.to_string());
            return Err(Error::Command(detail));
        }

        Ok(response)
    }

    /// Shut the session down: stop the reader task, then release the
    /// connection. Safe to call repeatedly; the client cannot be
    /// reconnected afterwards.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the reader task.
    pub async fn dispose(&self) {
        self.cancel.cancel();

        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, SessionState::Closed);
        self.connected.store(false, Ordering::Release);

        let SessionState::Connected(Session { writer, reader, .. }) = previous else {
            return;
        };

        match reader.await {
            Err(e) if e.is_panic() => {
                tracing::error!("lircd reader task panicked");
                std::panic::resume_unwind(e.into_panic());
            }
            Ok(()) | Err(_) => {}
        }

        drop(writer);
        tracing::debug!("lirc client disposed");
    }
}

impl Drop for LircClient {
    fn drop(&mut self) {
        // The reader task notices and drops its half of the stream.
        self.cancel.cancel();
    }
}

fn dispatch(events: &EventSender, event: LircEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Event receiver dropped, discarding event");
    }
}

async fn read_loop(
    mut packets: PacketStream,
    mailbox: Arc<Mailbox>,
    events: EventSender,
    cancel: CancellationToken,
    broken: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("lircd reader cancelled");
                mailbox.close();
                return;
            }
            () = broken.cancelled() => break Error::ConnectionLost,
            next = packets.next() => next,
        };

        match next {
            Some(Ok(Packet::Response(response))) => {
                tracing::trace!(
                    "Response to {:?} (success: {})",
                    response.command,
                    response.success
                );
                mailbox.post(response);
            }
            Some(Ok(Packet::Sighup)) => {
                tracing::debug!("lircd reloaded its configuration");
                dispatch(&events, LircEvent::DaemonReloaded);
            }
            Some(Ok(Packet::Button(button))) => {
                dispatch(&events, LircEvent::ButtonReceived(button));
            }
            Some(Err(e)) => break Error::from(e),
            None => break Error::ConnectionLost,
        }
    };

    tracing::warn!("Lost connection to lircd: {}", reason);
    mailbox.close();
    dispatch(&events, LircEvent::Disconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.response_timeout, Duration::from_secs(10));
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert_eq!(config.max_line_length, MAX_LINE_LENGTH);
    }

    #[test]
    fn test_config_builders() {
        let config = ClientConfig::default()
            .with_response_timeout(Duration::from_millis(250))
            .with_send_timeout(Duration::from_secs(1))
            .with_max_line_length(128);
        assert_eq!(config.response_timeout, Duration::from_millis(250));
        assert_eq!(config.send_timeout, Duration::from_secs(1));
        assert_eq!(config.max_line_length, 128);
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (client, _events) = LircClient::new(ClientConfig::default());

        assert!(!client.is_connected());
        assert!(matches!(client.get_version().await, Err(Error::NotConnected)));
        assert!(matches!(
            client.send_once("Amino", "KEY_PLAY", 0).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (client, _events) = LircClient::new(ClientConfig::default());
        let (stream, _daemon) = tokio::io::duplex(1024);

        client.connect_stream(stream).await.unwrap();
        assert!(client.is_connected());

        let (second, _daemon2) = tokio::io::duplex(1024);
        assert!(matches!(
            client.connect_stream(second).await,
            Err(Error::AlreadyConnected)
        ));

        client.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_final() {
        let (client, mut events) = LircClient::new(ClientConfig::default());
        let (stream, _daemon) = tokio::io::duplex(1024);
        client.connect_stream(stream).await.unwrap();

        client.dispose().await;
        client.dispose().await;

        assert!(!client.is_connected());
        assert!(matches!(client.get_version().await, Err(Error::NotConnected)));

        let (again, _daemon2) = tokio::io::duplex(1024);
        assert!(matches!(
            client.connect_stream(again).await,
            Err(Error::AlreadyConnected)
        ));

        // Cancellation is silent: the channel just closes.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dispose_unconnected_client() {
        let (client, mut events) = LircClient::new(ClientConfig::default());
        client.dispose().await;
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_client_connectable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Endpoint::Unix(dir.path().join("missing.sock"));
        let (client, _events) = LircClient::new(ClientConfig::default());

        let err = client.connect(&missing).await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(!client.is_connected());

        let (stream, _daemon) = tokio::io::duplex(1024);
        client.connect_stream(stream).await.unwrap();
        assert!(client.is_connected());
        client.dispose().await;
    }
}
