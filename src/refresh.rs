//! Staleness tracking for the embeddings snapshot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tracks when embeddings were last rebuilt via a plain-text timestamp file
/// holding epoch seconds (fractional values accepted).
#[derive(Debug, Clone)]
pub struct RefreshTracker {
    path: PathBuf,
    ttl: Duration,
}

impl RefreshTracker {
    /// Creates a tracker persisting to `path` with the given staleness TTL.
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    /// Timestamp file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether embeddings must be regenerated.
    ///
    /// True when forced, when no timestamp has ever been recorded, or when the
    /// recorded timestamp is older than the TTL. A timestamp that fails to
    /// parse counts as stale rather than crashing.
    pub fn need_update(&self, force: bool) -> bool {
        if force {
            return true;
        }
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return true,
        };
        let secs: f64 = match raw.trim().parse() {
            Ok(secs) => secs,
            Err(_) => {
                eprintln!(
                    "unreadable refresh timestamp in {}; scheduling refresh",
                    self.path.display()
                );
                return true;
            }
        };
        if !secs.is_finite() || secs < 0.0 {
            return true;
        }
        let last_refresh = UNIX_EPOCH + Duration::from_secs_f64(secs);
        match SystemTime::now().duration_since(last_refresh) {
            Ok(age) => age > self.ttl,
            // timestamp from the future; leave it alone until the TTL passes
            Err(_) => false,
        }
    }

    /// Records the current time as the last successful refresh.
    ///
    /// Call only after a refresh completes; a failed refresh must leave the
    /// previous timestamp in place so the next invocation retries.
    pub fn mark_refreshed(&self) -> io::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(io::Error::other)?;
        fs::write(&self.path, format!("{}", now.as_secs_f64()))
    }
}
