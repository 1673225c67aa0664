//! Driver for the pixel multiplexer control board.
//!
//! The board speaks a line-oriented ASCII protocol over TCP: each command is
//! terminated with `\r`, and each reply is one `\r\n`-terminated line followed
//! by the prompt `">>> "`. This crate handles the framing (including replies
//! that arrive split across reads), discovery of the attached substrate boards
//! and their adapter resistors, and an orderly teardown that opens every
//! switch before the socket is closed.
//!
//! # Layers
//!
//! - [`transport`]: TCP connection with keep-alive
//! - [`protocol`]: command termination, frame reading, reply parsing
//! - [`board`]: typed board operations ([`BoardClient`])
//! - [`substrate`]: substrate addressing and the discovered device model
//! - [`session`]: connect, verify, discover, teardown ([`MuxSession`])
//!
//! # Example
//!
//! ```no_run
//! use mux_control::{MuxSession, SessionOptions, Substrate};
//!
//! # async fn example() -> mux_control::MuxResult<()> {
//! let session = MuxSession::open("10.42.0.54:23", SessionOptions::default()).await?;
//! println!("substrates: {}", session.substrates().letters());
//!
//! session.select_pixel(Substrate::from_letter('A')?, 3).await?;
//! let counts = session.read_adc_channel(0).await?;
//! println!("ADC0 = {counts}");
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod substrate;
pub mod transport;

pub use board::BoardClient;
pub use error::{FrameFault, MuxError, MuxResult};
pub use protocol::{Frame, FrameStatus, ResponseValue};
pub use session::{MuxSession, SessionOptions, SessionState};
pub use substrate::{Adapter, DeviceState, PixelAddress, Substrate, SubstrateMask};
