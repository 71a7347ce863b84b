//! Target classification from the first bytes of a connection.
//!
//! The look-ahead is a heuristic, not a protocol parse: the bytes are decoded
//! permissively, lowercased, and searched for a per-target marker string.
//! Frame boundaries and length prefixes of the tunneled protocol are never
//! inspected. Defaults:
//! - peek_timeout: 5s
//! - peek_bytes: 1024

use std::io;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::backend::BackendRegistry;
use super::peek::PeekableStream;

/// Default time to wait for the client's first bytes.
pub const DEFAULT_PEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum number of bytes to look ahead.
pub const DEFAULT_PEEK_BYTES: usize = 1024;

/// Result of the look-ahead read.
#[derive(Debug)]
pub enum LookAheadResult {
    /// Bytes were buffered (count of new bytes).
    Data(usize),
    /// Client closed before sending anything.
    Eof,
    /// Nothing arrived within the wait.
    Timeout,
    /// I/O error during read.
    IoError(io::Error),
}

/// Configuration for the look-ahead read.
#[derive(Debug, Clone)]
pub struct LookAheadConfig {
    /// Maximum time to wait for data.
    pub timeout: Duration,
    /// Maximum bytes to read.
    pub max_bytes: usize,
}

impl Default for LookAheadConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PEEK_TIMEOUT,
            max_bytes: DEFAULT_PEEK_BYTES,
        }
    }
}

impl LookAheadConfig {
    /// Perform one bounded, non-consuming read on the client stream.
    ///
    /// Whatever is read stays buffered in `stream` and is replayed to the
    /// relay later.
    pub async fn read<R: AsyncRead + Unpin>(
        &self,
        stream: &mut PeekableStream<R>,
    ) -> LookAheadResult {
        match timeout(self.timeout, stream.fill(self.max_bytes)).await {
            Ok(Ok(0)) => LookAheadResult::Eof,
            Ok(Ok(n)) => LookAheadResult::Data(n),
            Ok(Err(e)) => LookAheadResult::IoError(e),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Look-ahead timeout");
                LookAheadResult::Timeout
            }
        }
    }
}

/// A marker string that selects a target when found in the look-ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRule {
    /// Lowercased marker.
    pub marker: String,
    /// Target id selected on match.
    pub target: String,
}

impl MarkerRule {
    /// Create a rule; the marker is lowercased so it can match lowercased input.
    pub fn new(marker: &str, target: &str) -> Self {
        Self {
            marker: marker.to_lowercase(),
            target: target.to_string(),
        }
    }
}

/// Maps look-ahead bytes to a target id.
#[derive(Debug, Clone)]
pub struct Classifier {
    default_target: String,
    rules: Vec<MarkerRule>,
}

impl Classifier {
    /// Create a classifier. Rules are tried in order; first match wins.
    pub fn new(default_target: &str, rules: Vec<MarkerRule>) -> Self {
        Self {
            default_target: default_target.to_string(),
            rules,
        }
    }

    /// Derive rules from a registry: every non-default target is its own marker.
    pub fn from_registry(registry: &BackendRegistry) -> Self {
        let default_target = registry.default_target();
        let rules = registry
            .targets()
            .filter(|target| *target != default_target)
            .map(|target| MarkerRule::new(target, target))
            .collect();

        Self::new(default_target, rules)
    }

    /// The target used when no marker matches.
    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    /// Marker rules in match order.
    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    /// Classify a look-ahead buffer. Always yields exactly one target.
    pub fn classify(&self, data: &[u8]) -> &str {
        if data.is_empty() {
            return &self.default_target;
        }

        let text = String::from_utf8_lossy(data).to_lowercase();

        match self.rules.iter().find(|rule| text.contains(&rule.marker)) {
            Some(rule) => {
                debug!(marker = %rule.marker, target = %rule.target, "Marker matched");
                &rule.target
            }
            None => &self.default_target,
        }
    }
}
