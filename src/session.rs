//! Session lifecycle for one control board connection.
//!
//! Opening a session walks the board through initialization:
//!
//! ```text
//! Disconnected -> Connecting -> VerifyingFirmware -> DiscoveringSubstrates
//!              -> ReadingResistors -> Ready -> TearingDown -> Closed
//! ```
//!
//! Any failure before `Ready` aborts the open and closes the socket. Once
//! `Ready`, the discovered substrates and resistor table do not change.
//! Closing opens every switch on the discovered substrates (best-effort) and
//! then closes the connection.

use crate::board::BoardClient;
use crate::error::{MuxError, MuxResult};
use crate::protocol::{Frame, ResponseValue, DEFAULT_RESPONSE_TIMEOUT};
use crate::substrate::{Adapter, DeviceState, PixelAddress, Substrate, SubstrateMask};
use crate::transport::{Connection, TransportOptions};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::Instrument;

/// Where a session is in its lifecycle.
///
/// [`MuxSession::open`] either returns a `Ready` session or fails, so
/// [`MuxSession::state`] only ever reports `Ready`, `TearingDown` or `Closed`.
/// The earlier states appear in the debug log of an open in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection yet.
    Disconnected,
    /// Opening the TCP connection.
    Connecting,
    /// Waiting for the version reply.
    VerifyingFirmware,
    /// Probing each substrate slot.
    DiscoveringSubstrates,
    /// Reading adapter resistors.
    ReadingResistors,
    /// Initialized and accepting commands.
    Ready,
    /// Opening switches before disconnecting.
    TearingDown,
    /// Connection released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::VerifyingFirmware => "verifying_firmware",
            SessionState::DiscoveringSubstrates => "discovering_substrates",
            SessionState::ReadingResistors => "reading_resistors",
            SessionState::Ready => "ready",
            SessionState::TearingDown => "tearing_down",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", label)
    }
}

/// How a session is opened.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Record `0` for every adapter instead of reading its resistor.
    pub ignore_adapter_resistors: bool,
    /// Deadline for each command's reply.
    pub response_timeout: Duration,
    /// Connect timeout and keep-alive settings.
    pub transport: TransportOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ignore_adapter_resistors: false,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            transport: TransportOptions::default(),
        }
    }
}

impl SessionOptions {
    /// Skip reading adapter resistors.
    pub fn with_ignore_adapter_resistors(mut self, ignore: bool) -> Self {
        self.ignore_adapter_resistors = ignore;
        self
    }

    /// Set the per-command reply deadline.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// An initialized connection to the multiplexer control board.
pub struct MuxSession {
    client: Arc<BoardClient>,
    device: DeviceState,
    state: Mutex<SessionState>,
}

impl MuxSession {
    /// Connect to `address` (`host:port`) and run board initialization.
    pub async fn open(address: &str, options: SessionOptions) -> MuxResult<Self> {
        let span = tracing::info_span!("mux_session", address = %address);
        async move {
            transition(SessionState::Disconnected, SessionState::Connecting);
            let connection = Connection::connect(address, &options.transport).await?;
            let client = BoardClient::new(connection, options.response_timeout);
            Self::initialize(client, &options).await
        }
        .instrument(span)
        .await
    }

    /// Run board initialization over an already-connected client.
    ///
    /// The client is closed if initialization fails.
    pub async fn initialize(client: BoardClient, options: &SessionOptions) -> MuxResult<Self> {
        match Self::discover(&client, options).await {
            Ok(device) => {
                transition(SessionState::ReadingResistors, SessionState::Ready);
                Ok(Self {
                    client: Arc::new(client),
                    device,
                    state: Mutex::new(SessionState::Ready),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Control board initialization failed");
                client.close().await;
                Err(e)
            }
        }
    }

    async fn discover(client: &BoardClient, options: &SessionOptions) -> MuxResult<DeviceState> {
        transition(SessionState::Connecting, SessionState::VerifyingFirmware);
        let identity = client.version().await?;
        tracing::info!(identity = %identity, "Connected to control board");

        transition(SessionState::VerifyingFirmware, SessionState::DiscoveringSubstrates);
        let substrates = discover_substrates(client).await;
        if substrates.is_empty() {
            tracing::info!("No multiplexer board detected");
        } else {
            tracing::info!(substrates = %substrates.letters(), "Found MUX board(s)");
        }

        transition(SessionState::DiscoveringSubstrates, SessionState::ReadingResistors);
        let adapters = read_adapters(client, substrates, options.ignore_adapter_resistors).await?;

        Ok(DeviceState::new(identity, substrates, adapters))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Everything learned during initialization.
    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    /// Identity line reported by the board firmware.
    pub fn identity(&self) -> &str {
        self.device.identity()
    }

    /// Substrates found at startup.
    pub fn substrates(&self) -> SubstrateMask {
        self.device.substrates()
    }

    /// Adapters in discovery order.
    pub fn adapters(&self) -> &[Adapter] {
        self.device.adapters()
    }

    /// Resistor values keyed by substrate letter.
    pub fn resistors(&self) -> BTreeMap<char, i64> {
        self.device.resistors()
    }

    /// Raw ADC counts on `channel` (0-7).
    pub async fn read_adc_channel(&self, channel: u8) -> MuxResult<i64> {
        self.ensure_ready()?;
        self.client.read_adc_channel(channel).await
    }

    /// Select `pixel` on `substrate`; pixel 0 opens all switches.
    pub async fn select_pixel(&self, substrate: Substrate, pixel: u8) -> MuxResult<bool> {
        self.ensure_ready()?;
        self.client
            .select_pixel(&PixelAddress::new(substrate, pixel))
            .await
    }

    /// Send an arbitrary command and return its raw frame.
    pub async fn query(&self, command: &str) -> MuxResult<Frame> {
        self.ensure_ready()?;
        Ok(self.client.query(command).await)
    }

    /// Send an arbitrary command and parse the reply.
    pub async fn get(&self, command: &str) -> MuxResult<Option<ResponseValue>> {
        self.ensure_ready()?;
        self.client.get(command).await
    }

    /// Open every discovered substrate's switches, then close the connection.
    ///
    /// Failures while opening switches are logged and do not stop the close.
    /// Calling this more than once is a no-op.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, SessionState::TearingDown | SessionState::Closed) {
                return;
            }
            transition(*state, SessionState::TearingDown);
            *state = SessionState::TearingDown;
        }

        teardown(&self.client, self.device.substrates()).await;

        transition(SessionState::TearingDown, SessionState::Closed);
        *self.state.lock() = SessionState::Closed;
    }

    fn ensure_ready(&self) -> MuxResult<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            _ => Err(MuxError::SessionClosed),
        }
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if matches!(state, SessionState::TearingDown | SessionState::Closed) {
            return;
        }

        let client = self.client.clone();
        let substrates = self.device.substrates();
        match Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("MuxSession dropped without close; tearing down in background");
                handle.spawn(async move {
                    teardown(&client, substrates).await;
                });
            }
            Err(_) => {
                tracing::warn!("MuxSession dropped outside a runtime; board switches left as-is");
            }
        }
    }
}

/// Probe every substrate slot in alphabet order.
pub async fn discover_substrates(client: &BoardClient) -> SubstrateMask {
    let mut found = SubstrateMask::default();
    for substrate in Substrate::all() {
        if client.probe_substrate(substrate).await {
            found.insert(substrate);
        }
    }
    found
}

/// Read the adapter resistor for each discovered substrate.
///
/// A reply that is not an integer is logged and recorded as `0`; a desync
/// aborts.
pub async fn read_adapters(
    client: &BoardClient,
    substrates: SubstrateMask,
    ignore_resistors: bool,
) -> MuxResult<Vec<Adapter>> {
    let mut adapters = Vec::new();
    for substrate in substrates.iter() {
        let resistor = if ignore_resistors {
            0
        } else {
            match client.read_adapter_resistor(substrate).await {
                Ok(value) => value,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(%substrate, error = %e, "Could not read adapter resistor");
                    0
                }
                Err(e) => return Err(e),
            }
        };
        tracing::debug!(%substrate, resistor, "Adapter");
        adapters.push(Adapter {
            substrate,
            resistor,
        });
    }
    Ok(adapters)
}

async fn teardown(client: &BoardClient, substrates: SubstrateMask) {
    for substrate in substrates.iter() {
        match client.select_pixel(&PixelAddress::open(substrate)).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%substrate, "Board did not confirm opening switches")
            }
            Err(e) => {
                tracing::warn!(%substrate, error = %e, "Failed to open switches during teardown")
            }
        }
    }
    client.close().await;
}

fn transition(from: SessionState, to: SessionState) {
    tracing::debug!(%from, %to, "session state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::tests::{client_with, reply};
    use crate::error::FrameFault;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn board(cmd: &str) -> String {
        match cmd {
            "v" => reply("Firmware version 1.4.2"),
            "cH" | "cA" => reply("MUX OK"),
            c if c.starts_with('c') => reply(""),
            "dH" => reply("Board H adapter resistor is 1000"),
            "dA" => reply("Board A adapter resistor is 220"),
            "ADC5" => reply("AIN 512"),
            c if c.starts_with('s') => reply(""),
            _ => reply("?"),
        }
    }

    #[tokio::test]
    async fn discovery_sets_msb_first_bits() {
        let client = client_with(board);
        let mask = discover_substrates(&client).await;
        assert_eq!(mask.bits(), 0b1000_0001);
        assert_eq!(mask.letters(), "HA");
    }

    #[tokio::test]
    async fn initialize_reads_resistors() {
        let session = MuxSession::initialize(client_with(board), &SessionOptions::default())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.identity(), "Firmware version 1.4.2");
        assert_eq!(session.substrates().letters(), "HA");
        let letters: Vec<char> = session
            .adapters()
            .iter()
            .map(|a| a.substrate.letter())
            .collect();
        assert_eq!(letters, vec!['H', 'A']);
        assert_eq!(session.resistors().get(&'H'), Some(&1000));
        assert_eq!(session.resistors().get(&'A'), Some(&220));
        assert_eq!(session.read_adc_channel(5).await.unwrap(), 512);

        session.close().await;
    }

    #[tokio::test]
    async fn ignored_resistors_are_zero() {
        let options = SessionOptions::default().with_ignore_adapter_resistors(true);
        let session = MuxSession::initialize(client_with(board), &options)
            .await
            .unwrap();
        assert_eq!(session.resistors().get(&'H'), Some(&0));
        assert_eq!(session.resistors().get(&'A'), Some(&0));
        session.close().await;
    }

    #[tokio::test]
    async fn bad_version_reply_aborts() {
        let client = client_with(|_| "garbage without framing".to_string());
        let result = MuxSession::initialize(client, &SessionOptions::default()).await;
        assert!(matches!(
            result,
            Err(MuxError::Handshake(FrameFault::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn close_opens_discovered_substrates_once() {
        static OPENS: AtomicUsize = AtomicUsize::new(0);
        let client = client_with(|cmd| {
            if cmd == "sH0" || cmd == "sA0" {
                OPENS.fetch_add(1, Ordering::SeqCst);
            }
            board(cmd)
        });
        let session = MuxSession::initialize(client, &SessionOptions::default())
            .await
            .unwrap();

        session.close().await;
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(OPENS.load(Ordering::SeqCst), 2);
        assert!(matches!(
            session.read_adc_channel(0).await,
            Err(MuxError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn teardown_continues_past_failures() {
        let client = client_with(|cmd| match cmd {
            "sH0" => reply("refused"),
            _ => board(cmd),
        });
        let session = MuxSession::initialize(client, &SessionOptions::default())
            .await
            .unwrap();
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.client.is_open().await);
    }

    #[tokio::test]
    async fn state_moves_from_ready_through_teardown_to_closed() {
        // Silent on sH0 so teardown waits out the reply deadline.
        let client = client_with(|cmd| match cmd {
            "sH0" => String::new(),
            _ => board(cmd),
        });
        let session = Arc::new(
            MuxSession::initialize(client, &SessionOptions::default())
                .await
                .unwrap(),
        );
        assert_eq!(session.state(), SessionState::Ready);

        let closing = tokio::spawn({
            let session = session.clone();
            async move { session.close().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::TearingDown);

        closing.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.state().to_string(), "closed");
    }
}
