//! Control board wire protocol: framing and reply parsing.

pub mod frame;
pub mod response;

pub use frame::{
    read_frame, terminate_command, write_command, Frame, FrameStatus, DEFAULT_RESPONSE_TIMEOUT,
    PROMPT, READ_TERMINATOR, WRITE_TERMINATOR,
};
pub use response::{parse_response, ResponseValue, RESPONSE_PARSERS};
