//! JSON-lines instruction input.
//!
//! One instruction object per line, e.g.
//! `{"id": 7, "kind": "write_weight", "params": [0, 3, -12]}`.
//! Blank lines and lines starting with `#` are ignored. Lines that do not
//! parse are logged and skipped so one bad line never stops the run.

use std::path::Path;

use fpgalink_frame::Instruction;
use fpgalink_pipeline::{QueueError, QueueSender};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exit::{io_error, CliResult};

pub type InputReader = Box<dyn AsyncBufRead + Unpin + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub submitted: u64,
    pub skipped: u64,
}

/// Open `path`, or stdin for `None` and `-`.
pub async fn open_input(path: Option<&Path>) -> CliResult<InputReader> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|err| io_error(&format!("failed to open {}", path.display()), err))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

/// `None` for lines that carry no instruction.
pub fn parse_line(line: &str) -> Option<serde_json::Result<Instruction>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Feed every instruction in `reader` into the pipeline.
///
/// Returns at end of input, on cancellation, or when the pipeline stops
/// accepting instructions. `instructions` is dropped on return, which tells
/// the packager the input is complete.
pub async fn ingest<R>(
    reader: R,
    instructions: QueueSender<Instruction>,
    cancel: &CancellationToken,
) -> CliResult<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = IngestStats::default();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.map_err(|err| io_error("failed to read input", err))?,
        };
        let Some(line) = line else {
            debug!(lines = stats.lines, "end of input");
            break;
        };
        stats.lines += 1;

        let instruction = match parse_line(&line) {
            None => continue,
            Some(Ok(instruction)) => instruction,
            Some(Err(err)) => {
                warn!(line = stats.lines, error = %err, "skipping unparseable instruction");
                stats.skipped += 1;
                continue;
            }
        };

        match instructions.send(instruction, cancel).await {
            Ok(()) => stats.submitted += 1,
            Err(QueueError::Cancelled) => break,
            Err(QueueError::Closed) => {
                warn!("pipeline stopped accepting instructions");
                break;
            }
        }
    }

    Ok(stats)
}
