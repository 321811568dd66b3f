use clap::{Parser, Subcommand};
use std::path::PathBuf;
use whistle2midi::analysis::parse_score;
use whistle2midi::config::SourceType;
use whistle2midi::midi::{self, MidiExportOptions};
use whistle2midi::{validate_input, Config, Transcriber};

/// Whistle-to-MIDI Transcription System
#[derive(Parser)]
#[command(name = "whistle2midi")]
#[command(about = "Transcribe whistled or hummed melodies to MIDI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe an audio file and write MIDI, notes and analysis output
    Transcribe {
        /// Input audio file (WAV)
        input: PathBuf,

        /// Output directory for results
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Recording source, selects filter and tolerance presets
        #[arg(long)]
        source: Option<SourceType>,

        /// Tempo used for beat quantization
        #[arg(long)]
        bpm: Option<f32>,

        /// Merge sensitivity (1-12), sets the minimum note length
        #[arg(long)]
        sensitivity: Option<u8>,

        /// Composition title, used for the file name
        #[arg(long)]
        title: Option<String>,

        /// Skip QA plots and reports
        #[arg(long)]
        no_qa: bool,
    },
    /// Encode a note JSON file (array or arrangement) as MIDI
    Export {
        /// Note events JSON
        input: PathBuf,

        /// Output MIDI path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tempo written to the file
        #[arg(long)]
        bpm: Option<f32>,

        /// Composition title, used for the default file name
        #[arg(long)]
        title: Option<String>,

        /// Print the file as a base64 data URI
        #[arg(long)]
        data_uri: bool,
    },
    /// Summarize the notes of a MIDI file
    Inspect {
        /// MIDI file to read
        input: PathBuf,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig {
        /// Show the preset for this source
        #[arg(long, default_value = "file")]
        source: SourceType,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose && cli.quiet {
        anyhow::bail!("Cannot specify both --verbose and --quiet");
    }
    init_logging(cli.verbose, cli.quiet);
    let quiet = cli.quiet;

    match cli.command {
        Commands::Transcribe {
            input,
            output,
            config,
            source,
            bpm,
            sensitivity,
            title,
            no_qa,
        } => {
            // Load configuration
            let mut config = match config {
                Some(config_path) => whistle2midi::config::load_config(config_path)?,
                None => Config::for_source(source.unwrap_or_default()),
            };
            if let Some(source) = source {
                config.apply_source_preset(source);
            }
            if let Some(bpm) = bpm {
                config.tempo.bpm = bpm;
            }
            if let Some(sensitivity) = sensitivity {
                config.aggregation.merge_sensitivity = sensitivity;
            }
            if no_qa {
                config.qa.enabled = false;
            }

            validate_input(&input, &config)?;

            let title = title.unwrap_or_else(|| config.export.default_title.clone());
            let processor = Transcriber::new(config);

            if !quiet {
                println!("Processing {}...", input.display());
            }

            match processor.process(&input, &output, &title)? {
                Some(path) if !quiet => println!("MIDI written to {}", path.display()),
                Some(_) => {}
                None => println!("No notes detected; see {}", output.join("analysis.json").display()),
            }

            if !quiet {
                println!("Results saved to {}", output.display());
            }
        }
        Commands::Export {
            input,
            output,
            bpm,
            title,
            data_uri,
        } => {
            let json = std::fs::read_to_string(&input)?;
            let tracks = parse_score(&json)?.into_tracks();

            let mut config = Config::default();
            if let Some(bpm) = bpm {
                config.tempo.bpm = bpm;
            }
            whistle2midi::config::validate_config(&config)?;

            let bytes = midi::encode_tracks(&tracks, &MidiExportOptions::from(&config))?;

            if data_uri {
                println!("{}", midi::to_data_uri(&bytes));
            } else {
                let title = title.unwrap_or_else(|| config.export.default_title.clone());
                let path = output.unwrap_or_else(|| {
                    PathBuf::from(midi::export_filename(&config.export.filename_prefix, &title))
                });
                std::fs::write(&path, &bytes)?;
                if !quiet {
                    println!(
                        "Wrote {} track(s), {} bytes to {}",
                        tracks.len(),
                        bytes.len(),
                        path.display()
                    );
                }
            }
        }
        Commands::Inspect { input } => {
            let bytes = std::fs::read(&input)?;
            let summary = midi::summarize(&bytes)?;

            println!(
                "format {}, {} track(s), {} ticks per beat",
                summary.format,
                summary.tracks.len(),
                summary
                    .ticks_per_beat
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "timecode".to_string())
            );
            for (i, track) in summary.tracks.iter().enumerate() {
                println!(
                    "track {} {:?}: program {:?}, {} notes, ends at tick {}",
                    i,
                    track.name.as_deref().unwrap_or(""),
                    track.program,
                    track.notes.len(),
                    track.end_tick
                );
                if let Some(bpm) = track.tempo_bpm {
                    println!("  tempo {:.1} BPM", bpm);
                }
                for note in &track.notes {
                    println!(
                        "  {:>6} +{:<5} {} (ch {})",
                        note.start_tick,
                        note.duration_ticks,
                        midi::midi_to_note_name(note.key),
                        note.channel
                    );
                }
            }
        }
        Commands::ValidateConfig { config } => {
            let config = whistle2midi::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig { source } => {
            let config = Config::for_source(source);
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
