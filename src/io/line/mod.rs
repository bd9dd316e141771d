// src/io/line/mod.rs
//
// Text line protocol spoken by the LED controller's serial emulator input.
// Outbound frames are `CAN:` commands; inbound lines are either `LED:` colour frames
// or free-form diagnostics.

pub mod codec;
pub mod color;

pub use codec::{format_command, LineCodec};
pub use color::{parse_color_line, parse_line, ColorFrame, InboundLine, Rgb};
