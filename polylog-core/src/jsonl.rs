//! JSONL helpers shared by the line-oriented sources.
//!
//! Blank lines are skipped but still counted, so the line numbers reported
//! here always match what an editor shows for the file.

use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One non-blank line of a JSONL stream.
#[derive(Debug)]
pub struct JsonlLine {
    /// 1-based physical line number
    pub line_number: usize,
    /// The line as written (without the trailing newline)
    pub raw: String,
    /// Parsed value, or the parser's message
    pub value: std::result::Result<serde_json::Value, String>,
}

/// Split text into parsed JSONL records, skipping blank lines.
pub fn parse_jsonl(text: &str) -> Vec<JsonlLine> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| JsonlLine {
            line_number: idx + 1,
            raw: line.to_string(),
            value: serde_json::from_str(line).map_err(|e| e.to_string()),
        })
        .collect()
}

/// Read a whole JSONL file. Invalid UTF-8 is replaced rather than rejected.
pub async fn read_jsonl(path: &Path) -> std::io::Result<Vec<JsonlLine>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(parse_jsonl(&String::from_utf8_lossy(&bytes)))
}

/// Read and parse only the first `limit` non-blank lines of a file.
///
/// Unparseable lines are dropped; metadata scans only care about records
/// they can read.
pub async fn read_head_lines(path: &Path, limit: usize) -> std::io::Result<Vec<serde_json::Value>> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut values = Vec::new();
    let mut seen = 0;

    while seen < limit {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::debug!(path = %path.display(), "Stopping head scan at non-UTF-8 line");
                break;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        seen += 1;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            values.push(value);
        }
    }

    Ok(values)
}
