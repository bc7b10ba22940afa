use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args as ClapArgs, Parser, Subcommand};
use crossbeam::channel::unbounded;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;

use tactus::audio_io;
use tactus::chain::VOLUME_MAX;
use tactus::command::{Command, InstrumentId};
use tactus::config::{EngineConfig, CONFIG};
use tactus::engine::AudioEngine;
use tactus::instrument::Instrument;
use tactus::score::Score;

/// Stream or render a performance score through the tactus engine.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a score JSON file, or render it to a WAV file
    Run(RunArgs),
    /// Generate a default config file and exit
    GenerateConfig(ConfigArgs),
}

#[derive(ClapArgs)]
struct RunArgs {
    /// Path to the score JSON file
    #[arg(long)]
    path: String,
    /// Render the score to the WAV named in its settings instead of streaming
    #[arg(long, default_value_t = false)]
    render: bool,
}

#[derive(ClapArgs)]
struct ConfigArgs {
    /// Output path for the generated configuration
    #[arg(long, default_value = "tactus.toml")]
    out: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::init_with_level(log::Level::Info)?;
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_command(args)?,
        Commands::GenerateConfig(cfg) => {
            EngineConfig::generate_default(&cfg.out)?;
            println!("Generated default config at {}", cfg.out);
        }
    }
    Ok(())
}

fn build_engine(
    score: &Score,
    sample_rate: f32,
    channels: u16,
) -> Result<(AudioEngine, InstrumentId), Box<dyn std::error::Error>> {
    let mut engine = AudioEngine::with_config(&CONFIG, sample_rate, channels)?;
    let spec = score.instrument.to_source_spec(sample_rate)?;
    let voices = score.settings.voices.unwrap_or(CONFIG.voices_per_instrument);
    let instrument = Instrument::new(&spec, voices, VOLUME_MAX, sample_rate)?;
    let id = engine.register(instrument);
    Ok((engine, id))
}

fn run_command(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let json_str = std::fs::read_to_string(&args.path)?;
    let score: Score = serde_json::from_str(&json_str)?;

    if args.render {
        let out_name = score
            .settings
            .output_filename
            .clone()
            .ok_or("output_filename missing in score settings")?;
        let out_path = if Path::new(&out_name).is_absolute() {
            PathBuf::from(&out_name)
        } else {
            CONFIG.output_dir.join(&out_name)
        };
        render_score_wav(&score, &out_path)?;
        println!("Rendered score to {}", out_path.display());
        return Ok(());
    }

    let (stream_rate, channels) = audio_io::output_spec()?;
    let sample_rate = stream_rate as f32;
    let (engine, id) = build_engine(&score, sample_rate, channels)?;

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

    println!("Playing {}... press Ctrl+C to stop", args.path);
    let timeline = score.timeline(id, sample_rate);
    let start = Instant::now();
    for (due_frame, cmd) in timeline {
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

fn render_score_wav(score: &Score, out_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    use hound::{SampleFormat, WavSpec, WavWriter};

    let sample_rate = score.settings.sample_rate;
    let (mut engine, id) = build_engine(score, sample_rate as f32, 2)?;
    let mut timeline = score.timeline(id, sample_rate as f32).into_iter().peekable();
    let target_frames = (score.duration_secs() * sample_rate as f64) as usize;

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WavWriter::create(out_path, spec)?;
    let start_time = Instant::now();

    let mut rendered = 0usize;
    let mut buffer = vec![0.0f32; 512 * 2];
    while rendered < target_frames {
        while let Some((due, _)) = timeline.peek() {
            if *due <= rendered as u64 {
                let (_, cmd) = timeline.next().expect("peeked entry exists");
                engine.handle_command(cmd);
            } else {
                break;
            }
        }
        let frames = 512.min(target_frames - rendered);
        buffer.resize(frames * 2, 0.0);
        engine.process_block(&mut buffer);
        for sample in &buffer[..frames * 2] {
            let s = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(s)?;
        }
        rendered += frames;
    }

    writer.finalize()?;
    let elapsed = start_time.elapsed().as_secs_f32();
    println!("Total render time: {elapsed:.2}s");
    Ok(())
}
