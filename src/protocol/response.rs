//! Typed parsing of board replies.
//!
//! Replies are recognized by their leading word. Each recognized prefix has a
//! parser that picks one space-separated field out of the line. New reply kinds
//! are added by extending [`RESPONSE_PARSERS`].

/// Value extracted from a recognized reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseValue {
    /// Raw ADC count as sent by the board (`AIN <count>`).
    Analog(String),
    /// Integer from a `Board ...` reply, e.g. an adapter resistor.
    Board(i64),
    /// Version string from a `Firmware ...` reply.
    Firmware(String),
    /// Integer from a `Photodiode ...` reply.
    Photodiode(i64),
}

impl ResponseValue {
    /// Integer view of the value, if it has one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ResponseValue::Analog(raw) => raw.trim().parse().ok(),
            ResponseValue::Board(value) | ResponseValue::Photodiode(value) => Some(*value),
            ResponseValue::Firmware(_) => None,
        }
    }

    /// Value as the board wrote it.
    pub fn as_text(&self) -> String {
        match self {
            ResponseValue::Analog(raw) | ResponseValue::Firmware(raw) => raw.clone(),
            ResponseValue::Board(value) | ResponseValue::Photodiode(value) => value.to_string(),
        }
    }
}

type ParseFn = fn(&str) -> Option<ResponseValue>;

/// Reply prefix and the parser for lines starting with it.
pub const RESPONSE_PARSERS: &[(&str, ParseFn)] = &[
    ("AIN", parse_analog),
    ("Board", parse_board),
    ("Firmware", parse_firmware),
    ("Photodiode", parse_photodiode),
];

/// Parse a reply line.
///
/// Returns `None` when no prefix matches or the expected field is missing or
/// not a number.
pub fn parse_response(text: &str) -> Option<ResponseValue> {
    RESPONSE_PARSERS
        .iter()
        .find(|(prefix, _)| text.starts_with(*prefix))
        .and_then(|(_, parse)| parse(text))
}

fn field(text: &str, index: usize) -> Option<&str> {
    text.split(' ').nth(index)
}

fn parse_analog(text: &str) -> Option<ResponseValue> {
    field(text, 1).map(|raw| ResponseValue::Analog(raw.to_string()))
}

fn parse_board(text: &str) -> Option<ResponseValue> {
    field(text, 5)?.parse().ok().map(ResponseValue::Board)
}

fn parse_firmware(text: &str) -> Option<ResponseValue> {
    field(text, 2).map(|raw| ResponseValue::Firmware(raw.to_string()))
}

fn parse_photodiode(text: &str) -> Option<ResponseValue> {
    field(text, 3)?.parse().ok().map(ResponseValue::Photodiode)
}
