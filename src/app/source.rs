use crate::domain::Event;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read input at line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Reads one JSON event per line. Blank lines are ignored; malformed lines
/// are logged, counted and skipped.
#[derive(Debug)]
pub struct EventSource<R> {
    lines: Lines<R>,
    line: u64,
    skipped: u64,
}

impl<R: AsyncBufRead + Unpin> EventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            skipped: 0,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        loop {
            let next = self.lines.next_line().await.map_err(|source| SourceError::Read {
                line: self.line + 1,
                source,
            })?;
            let Some(text) = next else {
                return Ok(None);
            };
            self.line += 1;

            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(text) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line, error = %e, "Skipping malformed event line");
                }
            }
        }
    }

    /// Lines that could not be parsed into an event.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_events_and_skips_bad_lines() {
        let input = concat!(
            "{\"subject_id\":\"user-1\",\"event_type\":\"login\"}\n",
            "\n",
            "not json\n",
            "{\"user_id\":\"user-2\",\"event_type\":\"logout\",\"data\":{\"n\":1}}\n",
        );
        let mut source = EventSource::new(BufReader::new(input.as_bytes()));

        let first = source.next_event().await.unwrap().unwrap();
        assert_eq!(first.subject_id, "user-1");

        let second = source.next_event().await.unwrap().unwrap();
        assert_eq!(second.subject_id, "user-2");
        assert_eq!(second.data["n"], 1);

        assert!(source.next_event().await.unwrap().is_none());
        assert_eq!(source.skipped(), 1);
    }
}
