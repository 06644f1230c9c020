use air_cursor::core_modules::detector::parse_detection_line;
use air_cursor::pipeline::{GesturePipeline, HandData, InteractionState, Parameters, PointerCommand, RecordingPointer};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// One output line per replayed frame.
#[derive(Serialize)]
struct FrameRecord<'a> {
    timestamp_ms: u64,
    hand: HandData,
    commands: &'a [PointerCommand],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("air_cursor=info")))
        .with_writer(io::stderr)
        .init();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: replay_tester <input.jsonl> [output.jsonl]");
        return Ok(());
    }
    let input_path = &args[1];
    let input = File::open(input_path).with_context(|| format!("opening {input_path}"))?;
    let mut output: Box<dyn Write> = match args.get(2) {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| format!("creating {path}"))?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    // --- 2. Pipeline Initialization ---
    let parameters = Parameters::default();
    let recorder = RecordingPointer::new(parameters.screen_center());
    let mut pipeline = GesturePipeline::new(parameters, recorder.clone())?;

    // --- 3. Replay Loop ---
    let mut states: BTreeMap<&'static str, u64> = BTreeMap::new();
    for (index, line) in BufReader::new(input).lines().enumerate() {
        let line = line.with_context(|| format!("reading {input_path}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let timed = parse_detection_line(&line).with_context(|| format!("{input_path} line {}", index + 1))?;
        let Some(hand) = pipeline.process_timed(&timed)? else {
            continue;
        };
        *states.entry(hand.status.as_str()).or_default() += 1;

        let commands = recorder.take_commands();
        let record = FrameRecord {
            timestamp_ms: timed.timestamp_ms,
            hand,
            commands: &commands,
        };
        serde_json::to_writer(&mut output, &record)?;
        writeln!(output)?;
    }

    // --- 4. Shutdown ---
    let frames_processed = pipeline.frames_processed();
    let frames_dropped = pipeline.frames_dropped();
    let held = pipeline.controller().state().is_pressing;
    pipeline.finish()?;
    let trailing = recorder.take_commands();
    if !trailing.is_empty() {
        serde_json::to_writer(&mut output, &serde_json::json!({ "shutdown": trailing }))?;
        writeln!(output)?;
    }
    output.flush()?;

    info!(frames_processed, frames_dropped, released_on_exit = held, "replay complete");
    for state in [
        InteractionState::Idle,
        InteractionState::PreClick,
        InteractionState::Click,
        InteractionState::Drag,
        InteractionState::Scroll,
    ] {
        let frames = states.get(state.as_str()).copied().unwrap_or(0);
        eprintln!("{:>9}: {frames}", state.as_str());
    }
    Ok(())
}
