use serde::{Deserialize, Serialize};

/// Outcome of a single blob integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInfo {
    /// When the check ran, epoch milliseconds.
    pub stored: i64,
    /// Whether the stored payload matched its recorded hash and length.
    pub healthy: bool,
    /// Human readable detail, empty when healthy.
    #[serde(default)]
    pub message: String,
}

impl CheckInfo {
    /// A healthy result recorded at `now_ms`.
    pub fn healthy(now_ms: i64) -> Self {
        Self {
            stored: now_ms,
            healthy: true,
            message: String::new(),
        }
    }

    /// An unhealthy result recorded at `now_ms`.
    pub fn unhealthy(now_ms: i64, message: impl Into<String>) -> Self {
        Self {
            stored: now_ms,
            healthy: false,
            message: message.into(),
        }
    }

    /// Combine with another tier's result: healthy only if both are.
    #[must_use]
    pub fn merge(mut self, other: &CheckInfo) -> Self {
        self.healthy = self.healthy && other.healthy;
        self.append_message(&other.message);
        self
    }

    /// Append a message, separating it from any existing text.
    pub fn append_message(&mut self, message: &str) {
        if message.is_empty() {
            return;
        }
        if !self.message.is_empty() {
            self.message.push_str("; ");
        }
        self.message.push_str(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_ands_health_and_joins_messages() {
        let primary = CheckInfo::unhealthy(1, "primary: hash mismatch");
        let backup = CheckInfo::healthy(2);
        let merged = primary.clone().merge(&backup);
        assert!(!merged.healthy);
        assert_eq!(merged.message, "primary: hash mismatch");

        let merged = CheckInfo::healthy(1).merge(&CheckInfo::unhealthy(2, "backup: missing"));
        assert!(!merged.healthy);
        assert_eq!(merged.message, "backup: missing");

        let mut both = primary;
        both.append_message("backup: missing");
        assert_eq!(both.message, "primary: hash mismatch; backup: missing");
    }
}
