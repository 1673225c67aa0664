//! Command layer for the multiplexer control board.
//!
//! [`BoardClient`] turns semantic operations into command/response exchanges.
//! The board is strictly half-duplex, so every exchange holds the connection
//! lock from the write until the prompt has been read.

use crate::error::{FrameFault, MuxError, MuxResult};
use crate::protocol::{
    parse_response, read_frame, write_command, Frame, FrameStatus, ResponseValue,
};
use crate::substrate::{PixelAddress, Substrate};
use crate::transport::{Connection, DynBoardIo, TransportOptions};
use std::time::Duration;
use tokio::sync::Mutex;

/// Reply to a substrate probe when a multiplexer board is attached.
pub const PROBE_OK: &str = "MUX OK";

/// Highest ADC channel on the board.
pub const MAX_ADC_CHANNEL: u8 = 7;

/// Client for the control board's command prompt.
pub struct BoardClient {
    connection: Mutex<Connection>,
    timeout: Duration,
}

impl BoardClient {
    /// Connect to the board at `address` (`host:port`).
    pub async fn connect(
        address: &str,
        transport: &TransportOptions,
        response_timeout: Duration,
    ) -> MuxResult<Self> {
        let connection = Connection::connect(address, transport).await?;
        Ok(Self::new(connection, response_timeout))
    }

    /// Client over an open connection.
    pub fn new(connection: Connection, response_timeout: Duration) -> Self {
        Self {
            connection: Mutex::new(connection),
            timeout: response_timeout,
        }
    }

    /// Client over an arbitrary byte channel, e.g. an in-memory duplex stream.
    pub fn with_io(io: DynBoardIo, response_timeout: Duration) -> Self {
        Self::new(Connection::from_io(io, "in-memory"), response_timeout)
    }

    /// Deadline applied to each reply.
    pub fn response_timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `command` and read its reply frame.
    ///
    /// Never fails: write and read problems come back as a failed frame.
    pub async fn query(&self, command: &str) -> Frame {
        let mut connection = self.connection.lock().await;
        let Some(channel) = connection.channel() else {
            return Frame::failed(String::new(), FrameFault::Closed);
        };

        if let Err(e) = write_command(channel.get_mut(), command).await {
            tracing::debug!(command, error = %e, "board write failed");
            return Frame::failed(String::new(), FrameFault::from(e));
        }

        read_frame(channel, self.timeout).await
    }

    /// Send `command` and parse the reply by its prefix.
    ///
    /// `Ok(None)` means the reply was well-formed but not one the parser knows.
    /// A failed frame is a [`MuxError::Desync`].
    pub async fn get(&self, command: &str) -> MuxResult<Option<ResponseValue>> {
        let frame = require_complete(command, self.query(command).await)?;
        let value = parse_response(&frame.text);
        if value.is_none() {
            tracing::warn!(command, response = %frame.text, "Got unexpected response from board");
        }
        Ok(value)
    }

    /// Ask the board to identify itself.
    pub async fn version(&self) -> MuxResult<String> {
        let frame = self.query("v").await;
        match frame.status {
            FrameStatus::Complete => Ok(frame.text),
            FrameStatus::Failed(fault) => Err(MuxError::Handshake(fault)),
        }
    }

    /// Raw ADC counts on `channel` (0-7).
    pub async fn read_adc_channel(&self, channel: u8) -> MuxResult<i64> {
        if channel > MAX_ADC_CHANNEL {
            return Err(MuxError::InvalidChannel(channel));
        }
        let command = format!("ADC{channel}");
        let value = self.get(&command).await?;
        integer_value(&command, value)
    }

    /// Calibration resistor on the adapter for `substrate`.
    pub async fn read_adapter_resistor(&self, substrate: Substrate) -> MuxResult<i64> {
        let command = format!("d{}", substrate.letter());
        let value = self.get(&command).await?;
        integer_value(&command, value)
    }

    /// Select a pixel. Pixel 0 opens every switch on the substrate.
    ///
    /// Returns `false` when the board answered with anything but an empty
    /// line.
    pub async fn select_pixel(&self, address: &PixelAddress) -> MuxResult<bool> {
        let command = address.command();
        let frame = require_complete(&command, self.query(&command).await)?;
        if frame.text.is_empty() {
            Ok(true)
        } else {
            tracing::warn!(
                command = %command,
                response = %frame.text,
                "Got unexpected response from board"
            );
            Ok(false)
        }
    }

    /// Whether a multiplexer board answers on `substrate`.
    pub async fn probe_substrate(&self, substrate: Substrate) -> bool {
        let command = format!("c{}", substrate.letter());
        let frame = self.query(&command).await;
        if let Some(fault) = frame.fault() {
            tracing::warn!(%substrate, %fault, "Substrate probe did not complete cleanly");
        }
        frame.text == PROBE_OK
    }

    /// Whether the connection has not been closed yet.
    pub async fn is_open(&self) -> bool {
        self.connection.lock().await.is_open()
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        self.connection.lock().await.close().await;
    }
}

fn require_complete(command: &str, frame: Frame) -> MuxResult<Frame> {
    match frame.fault() {
        None => Ok(frame),
        Some(fault) => Err(MuxError::Desync {
            command: command.to_string(),
            fault: fault.clone(),
        }),
    }
}

fn integer_value(command: &str, value: Option<ResponseValue>) -> MuxResult<i64> {
    match value.as_ref().and_then(ResponseValue::as_integer) {
        Some(n) => Ok(n),
        None => Err(MuxError::UnexpectedResponse {
            command: command.to_string(),
            response: value.map(|v| v.as_text()).unwrap_or_default(),
        }),
    }
}
