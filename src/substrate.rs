//! Substrate addressing and the discovered device model.
//!
//! The multiplexer has eight substrate slots named `H` through `A`. The order
//! matters: slot `H` maps to the most significant bit of the discovery mask and
//! slot `A` to the least significant one.

use crate::error::{MuxError, MuxResult};
use std::collections::BTreeMap;
use std::fmt;

/// Substrate letters, most significant first.
pub const SUBSTRATE_ALPHABET: [char; 8] = ['H', 'G', 'F', 'E', 'D', 'C', 'B', 'A'];

/// One substrate slot on the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Substrate(u8);

impl Substrate {
    /// All slots in alphabet order.
    pub fn all() -> impl Iterator<Item = Substrate> {
        (0..SUBSTRATE_ALPHABET.len() as u8).map(Substrate)
    }

    /// Look up a slot by letter. Lowercase letters are accepted.
    pub fn from_letter(letter: char) -> MuxResult<Self> {
        let upper = letter.to_ascii_uppercase();
        SUBSTRATE_ALPHABET
            .iter()
            .position(|&c| c == upper)
            .map(|i| Substrate(i as u8))
            .ok_or(MuxError::UnknownSubstrate(letter))
    }

    /// Position in the alphabet (0 = `H`).
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Letter naming this slot.
    pub fn letter(self) -> char {
        SUBSTRATE_ALPHABET[self.index()]
    }

    /// Discovery-mask bit for this slot.
    pub fn mask_bit(self) -> u8 {
        1 << (7 - self.0)
    }
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl TryFrom<char> for Substrate {
    type Error = MuxError;

    fn try_from(letter: char) -> MuxResult<Self> {
        Substrate::from_letter(letter)
    }
}

/// Bitmask of substrates that answered their probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstrateMask(u8);

impl SubstrateMask {
    /// Mask from raw bits, `H` in bit 7.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Mark `substrate` as present.
    pub fn insert(&mut self, substrate: Substrate) {
        self.0 |= substrate.mask_bit();
    }

    /// Whether `substrate` is present.
    pub fn contains(self, substrate: Substrate) -> bool {
        self.0 & substrate.mask_bit() != 0
    }

    /// No multiplexer board answered.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Present substrates in alphabet order.
    pub fn iter(self) -> impl Iterator<Item = Substrate> {
        Substrate::all().filter(move |s| self.contains(*s))
    }

    /// Present substrates as a string of letters, e.g. `"HA"`.
    pub fn letters(self) -> String {
        self.iter().map(Substrate::letter).collect()
    }
}

/// One selectable measurement point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelAddress {
    /// Substrate the pixel is on.
    pub substrate: Substrate,
    /// Pixel index; 0 opens every switch.
    pub pixel: u8,
}

impl PixelAddress {
    /// Pixel `pixel` on `substrate`.
    pub fn new(substrate: Substrate, pixel: u8) -> Self {
        Self { substrate, pixel }
    }

    /// The "open all switches" selector for a substrate.
    pub fn open(substrate: Substrate) -> Self {
        Self::new(substrate, 0)
    }

    /// Whether this selects no pixel.
    pub fn is_open(&self) -> bool {
        self.pixel == 0
    }

    /// Wire command selecting this pixel, e.g. `sA3`.
    pub fn command(&self) -> String {
        format!("s{}{}", self.substrate.letter(), self.pixel)
    }
}

/// Adapter board and its calibration resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adapter {
    /// Substrate the adapter is plugged into.
    pub substrate: Substrate,
    /// Resistor value, or 0 when reading was skipped.
    pub resistor: i64,
}

/// What the session learned about the board during initialization.
///
/// Built once while the session opens and never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    identity: String,
    substrates: SubstrateMask,
    adapters: Vec<Adapter>,
}

impl DeviceState {
    pub(crate) fn new(identity: String, substrates: SubstrateMask, adapters: Vec<Adapter>) -> Self {
        Self {
            identity,
            substrates,
            adapters,
        }
    }

    /// Identity line the board returned to the version check.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Substrates that answered their probe.
    pub fn substrates(&self) -> SubstrateMask {
        self.substrates
    }

    /// Adapters in discovery order.
    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    /// Resistor recorded for `substrate`, if it was discovered.
    pub fn resistor(&self, substrate: Substrate) -> Option<i64> {
        self.adapters
            .iter()
            .find(|a| a.substrate == substrate)
            .map(|a| a.resistor)
    }

    /// Resistor values keyed by substrate letter.
    pub fn resistors(&self) -> BTreeMap<char, i64> {
        self.adapters
            .iter()
            .map(|a| (a.substrate.letter(), a.resistor))
            .collect()
    }
}
