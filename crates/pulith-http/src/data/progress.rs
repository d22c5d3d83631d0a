use std::fmt;
use std::sync::Arc;

/// Transfer progress reported while a body is streamed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    /// Completion in `0.0..=1.0`. Stays at `0.0` while the total is unknown.
    pub percent: f64,

    /// Bytes observed so far.
    pub transferred_bytes: u64,

    /// Expected size in bytes, `0` when unknown.
    pub total_bytes: u64,
}

impl Progress {
    pub fn new(percent: f64, transferred_bytes: u64, total_bytes: u64) -> Self {
        Self {
            percent,
            transferred_bytes,
            total_bytes,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 1.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total_bytes == 0 {
            write!(f, "{} bytes", self.transferred_bytes)
        } else {
            write!(
                f,
                "{:.0}% ({}/{} bytes)",
                self.percent * 100.0,
                self.transferred_bytes,
                self.total_bytes
            )
        }
    }
}

/// Callback receiving each progress event together with the chunk that produced it.
///
/// Lifecycle events (the initial download event and the completion event) carry an
/// empty chunk.
pub type ProgressCallback = Arc<dyn Fn(Progress, &[u8]) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_known_total() {
        let progress = Progress::new(0.5, 50, 100);
        assert_eq!(progress.to_string(), "50% (50/100 bytes)");
    }

    #[test]
    fn test_display_unknown_total() {
        let progress = Progress::new(0.0, 12, 0);
        assert_eq!(progress.to_string(), "12 bytes");
        assert!(!progress.is_complete());
    }
}
