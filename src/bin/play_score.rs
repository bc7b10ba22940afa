use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel::unbounded;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;

use tactus::audio_io;
use tactus::chain::VOLUME_MAX;
use tactus::command::Command;
use tactus::config::CONFIG;
use tactus::engine::AudioEngine;
use tactus::instrument::Instrument;
use tactus::score::Score;

/// Simple player: stream a score JSON file through the default output.
#[derive(Parser)]
struct Args {
    /// Path to the score JSON file
    score_file: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::init_with_level(log::Level::Info)?;
    let args = Args::parse();
    let json_str = std::fs::read_to_string(&args.score_file)?;
    let score: Score = serde_json::from_str(&json_str)?;

    let (stream_rate, channels) = audio_io::output_spec()?;
    let sample_rate = stream_rate as f32;

    let mut engine = AudioEngine::with_config(&CONFIG, sample_rate, channels)?;
    let spec = score.instrument.to_source_spec(sample_rate)?;
    let voices = score.settings.voices.unwrap_or(CONFIG.voices_per_instrument);
    let instrument = Instrument::new(&spec, voices, VOLUME_MAX, sample_rate)?;
    let id = engine.register(instrument);

    let rb = HeapRb::<Command>::new(1024);
    let (mut prod, cons) = rb.split();
    let (tx, rx) = unbounded();

    let audio = std::thread::spawn(move || audio_io::run_output_stream(engine, cons, rx));

    let stopping = Arc::new(AtomicBool::new(false));
    let ctrlc_stop = stopping.clone();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        ctrlc_stop.store(true, Ordering::SeqCst);
        let _ = ctrlc_tx.send(());
    })?;

    println!("Playing {}... press Ctrl+C to stop", args.score_file);
    let start = Instant::now();
    for (due_frame, cmd) in score.timeline(id, sample_rate) {
        let due = Duration::from_secs_f64(due_frame as f64 / sample_rate as f64);
        while start.elapsed() < due && !stopping.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        if prod.try_push(cmd).is_err() {
            log::warn!("command ring full, dropping an event");
        }
    }
    if !stopping.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs_f64(score.settings.tail_secs.max(0.0)));
        let _ = tx.send(());
    }

    match audio.join() {
        Ok(result) => result?,
        Err(_) => return Err("audio thread panicked".into()),
    }
    Ok(())
}
