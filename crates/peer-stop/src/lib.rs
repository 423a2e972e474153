//! # peer-stop
//!
//! Streaming stop-sequence handling for generated text.
//!
//! Supports:
//! - Stop matching over an incremental byte stream ([`StopBuffer`])
//! - Bounded hold-back: at most `L - 1` bytes withheld, `L` the longest stop
//! - First match in declared order (no longest-match preference)
//! - Reassembly of UTF-8 characters split across fragments ([`Utf8Assembler`])

mod matcher;
mod utf8;

pub use matcher::{Release, StopBuffer};
pub use utf8::Utf8Assembler;
