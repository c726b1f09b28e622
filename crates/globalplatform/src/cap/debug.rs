//! Debug component (CAP component tag 12).
//!
//! Never sent to the card — [`crate::archive::CapComponents::without_debug`]
//! strips the `debug.cap`/`debug.capx` archive members before load assembly
//! even reaches this parser. Kept only so a caller inspecting an archive
//! (e.g. `cap-info`-style tooling) can see that debug information is
//! present without decoding its contents, which are source-level symbol
//! tables this driver has no use for.

#[derive(Debug, Clone)]
pub struct DebugComponent {
    pub raw: Vec<u8>,
}

impl DebugComponent {
    pub fn parse(data: &[u8]) -> Self {
        Self { raw: data.to_vec() }
    }
}
