//! Logging bootstrap using `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Installs a fmt subscriber at `level`. `RUST_LOG` overrides the level.
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Formats bytes as spaced hex for trace output, truncating long buffers.
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let shown = &data[..data.len().min(max)];
    let mut out = shown
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max {
        out.push_str(&format!(" ... ({} bytes)", data.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[0x01, 0xab], 8), "01 ab");
        assert_eq!(hex_preview(&[0, 1, 2, 3], 2), "00 01 ... (4 bytes)");
    }
}
