// THEORY:
// The hand-landmark detector is an external capability. This module is the seam
// between it and the engine: whatever the detector is (a file of recorded frames,
// a process writing to our stdin, a child process we spawn), it ends up as a
// bounded channel of `TimedObservation`s that the session's producer drains.
//
// Each detector result is one JSON line in `DetectionFrame` format. A line that
// does not parse, a read error, or a child process that exits unsuccessfully is a
// detector fault: it is sent down the channel as an `Err` and the adapter stops.
// There is no reconnect.

use crate::core_modules::observation::{DetectionFrame, TimedObservation};
use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Depth of the detector-to-producer channel. The producer keeps up with the
/// camera, so one slot is enough; a stalled producer stalls the detector.
pub const OBSERVATION_CHANNEL_DEPTH: usize = 1;

pub type ObservationSender = mpsc::Sender<Result<TimedObservation>>;
pub type ObservationReceiver = mpsc::Receiver<Result<TimedObservation>>;

pub fn observation_channel() -> (ObservationSender, ObservationReceiver) {
    mpsc::channel(OBSERVATION_CHANNEL_DEPTH)
}

/// Where detector output comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorSource {
    /// JSON lines on our own stdin.
    Stdin,
    /// A recorded JSON-lines file.
    File(PathBuf),
    /// A detector command whose stdout carries JSON lines, e.g. `python hand_detect.py`.
    Command(String),
}

/// Parses one line of detector output.
pub fn parse_detection_line(line: &str) -> Result<TimedObservation> {
    let frame: DetectionFrame = serde_json::from_str(line).context("malformed detector frame")?;
    frame.into_observation()
}

/// Starts forwarding detector output into a fresh observation channel.
pub async fn spawn_detector(source: DetectorSource) -> Result<(ObservationReceiver, JoinHandle<()>)> {
    let (tx, rx) = observation_channel();
    let handle = match source {
        DetectorSource::Stdin => {
            info!("reading detector frames from stdin");
            tokio::spawn(async move {
                forward_lines(BufReader::new(tokio::io::stdin()), tx).await;
            })
        }
        DetectorSource::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening detector recording {}", path.display()))?;
            info!(path = %path.display(), "replaying detector frames");
            tokio::spawn(async move {
                forward_lines(BufReader::new(file), tx).await;
            })
        }
        DetectorSource::Command(command_line) => {
            let mut parts = command_line.split_whitespace();
            let Some(program) = parts.next() else {
                bail!("empty detector command");
            };
            let mut child = Command::new(program)
                .args(parts)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("starting detector `{command_line}`"))?;
            let stdout = child.stdout.take().context("detector stdout was not captured")?;
            info!(command = %command_line, "detector process started");
            tokio::spawn(async move {
                if forward_lines(BufReader::new(stdout), tx.clone()).await != ForwardEnd::EndOfInput {
                    // Dropping `child` kills the detector.
                    return;
                }
                match child.wait().await {
                    Ok(status) if status.success() => debug!("detector process exited"),
                    Ok(status) => {
                        let _ = tx.send(Err(anyhow!("detector process exited with {status}"))).await;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!(e).context("waiting for detector process"))).await;
                    }
                }
            })
        }
    };
    Ok((rx, handle))
}

/// Why `forward_lines` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    EndOfInput,
    /// A fault was reported down the channel.
    Fault,
    /// The receiving side was dropped.
    Closed,
}

/// Forwards parsed lines until end of input, a fault, or the receiver closing.
pub async fn forward_lines<R>(reader: R, tx: ObservationSender) -> ForwardEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0u64;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ForwardEnd::EndOfInput,
            Err(e) => {
                error!(error = %e, "detector read failed");
                let _ = tx.send(Err(anyhow!(e).context("reading detector output"))).await;
                return ForwardEnd::Fault;
            }
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_detection_line(&line) {
            Ok(observation) => {
                if tx.send(Ok(observation)).await.is_err() {
                    return ForwardEnd::Closed;
                }
            }
            Err(e) => {
                let e = e.context(format!("detector line {line_number}"));
                error!(error = %format!("{e:#}"), "detector fault");
                let _ = tx.send(Err(e)).await;
                return ForwardEnd::Fault;
            }
        }
    }
}
