//! Trace-level packet dumps.
//!
//! Emitted through the `log` facade at `trace`; a frontend that enables
//! `log`'s `release_max_level_*` features compiles the call sites down to
//! nothing in release builds.

use crate::protocol::PACKET_LEN;

/// Formats one row of bytes as space-separated hex.
fn hex_line(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// Dumps the reports contained in a transfer buffer, one log line per
/// 16-byte row.
pub fn trace_packets(tag: &str, buf: &[u8]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }
    for (index, report) in buf.chunks(PACKET_LEN).enumerate() {
        log::trace!("{tag} report {index}:");
        for row in report.chunks(16) {
            log::trace!("  {}", hex_line(row));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_line_formats_uppercase_pairs() {
        assert_eq!(hex_line(&[0x00, 0xAB, 0x5]), "00 AB 05");
        assert_eq!(hex_line(&[]), "");
    }
}
