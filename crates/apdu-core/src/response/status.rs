//! Status word (`SW1 SW2`) representation.

use core::fmt;

/// The two status bytes terminating every APDU response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// SW1.
    pub sw1: u8,
    /// SW2.
    pub sw2: u8,
}

impl StatusWord {
    /// `90 00` — normal success.
    pub const SUCCESS: Self = Self { sw1: 0x90, sw2: 0x00 };
    /// `69 85` — conditions of use not satisfied.
    pub const CONDITIONS_NOT_SATISFIED: Self = Self { sw1: 0x69, sw2: 0x85 };
    /// `6A 88` — referenced data not found.
    pub const REFERENCED_DATA_NOT_FOUND: Self = Self { sw1: 0x6A, sw2: 0x88 };

    /// Build from the two raw bytes.
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Combine into a 16-bit value (`SW1 << 8 | SW2`).
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }

    /// `true` for `90 00`.
    pub const fn is_success(self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// `true` for `61 xx` — more data is available via GET RESPONSE.
    pub const fn is_more_data(self) -> bool {
        self.sw1 == 0x61
    }

    /// `true` for `6C xx` — wrong `Le`; retry with `Le := SW2`.
    pub const fn is_wrong_le(self) -> bool {
        self.sw1 == 0x6C
    }

    /// `true` for `63 1x` — GET STATUS has more records to return.
    pub const fn is_more_records(self) -> bool {
        self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0x10
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from((sw1, sw2): (u8, u8)) -> Self {
        Self::new(sw1, sw2)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}
