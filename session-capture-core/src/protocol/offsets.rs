//! Text format printed by the offset probe and parsed by the controller:
//!
//! ```text
//! [IAudioRenderClient]
//! getBuffer=0x1a2b0
//! releaseBuffer=0x1a3c0
//! ```

use std::fmt::Write;

use super::hook_info::RenderClientOffsets;

pub const SECTION: &str = "IAudioRenderClient";
pub const KEY_GET_BUFFER: &str = "getBuffer";
pub const KEY_RELEASE_BUFFER: &str = "releaseBuffer";

pub fn format_offsets(offsets: &RenderClientOffsets) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{SECTION}]");
    let _ = writeln!(out, "{KEY_GET_BUFFER}={:#x}", offsets.get_buffer);
    let _ = writeln!(out, "{KEY_RELEASE_BUFFER}={:#x}", offsets.release_buffer);
    out
}

/// Parses probe output. Missing keys, other sections and malformed values
/// all read as 0, i.e. unresolved.
pub fn parse_offsets(text: &str) -> RenderClientOffsets {
    let mut offsets = RenderClientOffsets::default();
    let mut in_section = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = name.trim() == SECTION;
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = parse_uint(value.trim()).unwrap_or(0);
        match key.trim() {
            KEY_GET_BUFFER => offsets.get_buffer = value,
            KEY_RELEASE_BUFFER => offsets.release_buffer = value,
            _ => {}
        }
    }

    offsets
}

fn parse_uint(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
