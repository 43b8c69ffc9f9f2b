//! Captured `console.*` output.

/// Console method a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn from_method(name: &str) -> Self {
        match name {
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "debug" => Self::Debug,
            _ => Self::Log,
        }
    }

    fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Log => None,
            Self::Info => Some("[info] "),
            Self::Warn => Some("[warn] "),
            Self::Error => Some("[error] "),
            Self::Debug => Some("[debug] "),
        }
    }
}

/// Bounded log buffer for one run.
///
/// Entries past `max_entries` are dropped and counted; each entry is cut to
/// `max_entry_len` characters. Every line is also mirrored to `tracing`
/// under the `codecall::script` target, whether or not it was kept.
#[derive(Debug)]
pub struct LogBuffer {
    entries: Vec<String>,
    max_entries: usize,
    max_entry_len: usize,
    dropped: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize, max_entry_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
            max_entry_len,
            dropped: 0,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Log | LogLevel::Info => {
                tracing::info!(target: "codecall::script", "{message}")
            }
            LogLevel::Warn | LogLevel::Error => {
                tracing::warn!(target: "codecall::script", "{message}")
            }
            LogLevel::Debug => tracing::debug!(target: "codecall::script", "{message}"),
        }

        if self.entries.len() >= self.max_entries {
            self.dropped += 1;
            return;
        }
        let mut entry = match level.prefix() {
            Some(prefix) => format!("{prefix}{message}"),
            None => message,
        };
        if let Some((cut, _)) = entry.char_indices().nth(self.max_entry_len) {
            entry.truncate(cut);
        }
        self.entries.push(entry);
    }

    pub fn into_entries(self) -> Vec<String> {
        if self.dropped > 0 {
            tracing::warn!(
                dropped = self.dropped,
                max = self.max_entries,
                "script log entries dropped"
            );
        }
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_prefixed_except_log() {
        let mut buf = LogBuffer::new(10, 100);
        buf.push(LogLevel::Log, "plain".into());
        buf.push(LogLevel::Warn, "careful".into());
        assert_eq!(buf.into_entries(), ["plain", "[warn] careful"]);
    }

    #[test]
    fn entries_and_lengths_are_capped() {
        let mut buf = LogBuffer::new(2, 3);
        buf.push(LogLevel::Log, "abcdef".into());
        buf.push(LogLevel::Log, "é日本語".into());
        buf.push(LogLevel::Log, "dropped".into());
        assert_eq!(buf.into_entries(), ["abc", "é日本"]);
    }
}
