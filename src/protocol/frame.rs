//! Wire framing for the control board's command prompt.
//!
//! Commands are terminated with a single `\r`. Every command is answered with
//! one line terminated by `\r\n`, followed by the 4-byte prompt `">>> "`.
//!
//! The board sometimes writes a reply in two pieces, so the bytes after the
//! first line are not always the prompt. When they are not, they are treated
//! as the start of the real reply line and the prompt is looked for once more
//! after that line. A prompt that is still missing means the command stream is
//! out of step with the board.
//!
//! Nothing in this module returns an error for a bad read. Failures are
//! reported through [`FrameStatus`] so the command layer decides what is fatal.

use crate::error::FrameFault;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Appended to outgoing commands.
pub const WRITE_TERMINATOR: char = '\r';

/// Ends every response line.
pub const READ_TERMINATOR: &[u8] = b"\r\n";

/// Sent by the board once a command has completed.
pub const PROMPT: &[u8; 4] = b">>> ";

/// Default time the board has to finish a reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of reading one response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// Line and prompt were both found.
    Complete,
    /// The frame is not trustworthy.
    Failed(FrameFault),
}

/// One response from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Reply line with the terminator stripped.
    pub text: String,
    /// Whether the frame can be trusted.
    pub status: FrameStatus,
}

impl Frame {
    /// Frame read cleanly.
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: FrameStatus::Complete,
        }
    }

    /// Frame that failed for `fault`, keeping whatever text was read.
    pub fn failed(text: impl Into<String>, fault: FrameFault) -> Self {
        Self {
            text: text.into(),
            status: FrameStatus::Failed(fault),
        }
    }

    /// Line and prompt both arrived.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, FrameStatus::Complete)
    }

    /// Why the frame failed, if it did.
    pub fn fault(&self) -> Option<&FrameFault> {
        match &self.status {
            FrameStatus::Complete => None,
            FrameStatus::Failed(fault) => Some(fault),
        }
    }
}

/// Add the write terminator unless the command already ends with it.
pub fn terminate_command(command: &str) -> String {
    if command.ends_with(WRITE_TERMINATOR) {
        command.to_string()
    } else {
        format!("{command}{WRITE_TERMINATOR}")
    }
}

/// Send one command, terminated, and flush it.
pub async fn write_command<W>(writer: &mut W, command: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let wire = terminate_command(command);
    tracing::debug!(command = %command.trim_end(), "board write");
    writer.write_all(wire.as_bytes()).await?;
    writer.flush().await
}

/// Read one response frame within `deadline`.
///
/// Timeouts and I/O failures come back as a failed frame with empty text.
pub async fn read_frame<R>(reader: &mut R, deadline: Duration) -> Frame
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    match tokio::time::timeout(deadline, read_frame_inner(reader)).await {
        Ok(Ok(frame)) => {
            tracing::debug!(response = %frame.text, ok = frame.is_ok(), "board read");
            frame
        }
        Ok(Err(err)) => {
            let fault = FrameFault::from(err);
            tracing::debug!(%fault, "board read failed");
            Frame::failed(String::new(), fault)
        }
        Err(_) => {
            tracing::debug!(?deadline, "board read timed out");
            Frame::failed(String::new(), FrameFault::Timeout(deadline))
        }
    }
}

async fn read_frame_inner<R>(reader: &mut R) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if !strip_terminator(&mut line) {
        tracing::warn!(
            partial = %String::from_utf8_lossy(&line),
            "Didn't find expected terminator during read"
        );
    }

    let maybe_prompt = read_prompt(reader).await?;
    if &maybe_prompt == PROMPT {
        return Ok(Frame::complete(decode(&line)));
    }

    // Not a prompt: those bytes start the actual reply line.
    let mut line = maybe_prompt.to_vec();
    reader.read_until(b'\n', &mut line).await?;
    if !strip_terminator(&mut line) {
        tracing::warn!(
            partial = %String::from_utf8_lossy(&line),
            "Didn't find expected terminator during read"
        );
        return Ok(Frame::failed(decode(&line), FrameFault::MissingTerminator));
    }

    let maybe_prompt = read_prompt(reader).await?;
    if &maybe_prompt == PROMPT {
        Ok(Frame::complete(decode(&line)))
    } else {
        let got = decode(&maybe_prompt);
        tracing::warn!(expected = ">>> ", got = %got, "Expected a prompt from the board");
        Ok(Frame::failed(decode(&line), FrameFault::MissingPrompt(got)))
    }
}

async fn read_prompt<R>(reader: &mut R) -> std::io::Result<[u8; 4]>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

fn strip_terminator(line: &mut Vec<u8>) -> bool {
    if line.ends_with(READ_TERMINATOR) {
        line.truncate(line.len() - READ_TERMINATOR.len());
        true
    } else {
        false
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
