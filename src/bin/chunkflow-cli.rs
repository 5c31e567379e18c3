//! chunkflow-cli - Command-line interface for ChunkFlow
//!
//! Splits files into chunks and streams them through concurrent,
//! order-preserving transforms.

use bytes::Bytes;
use chunkflow::{
    process_in_chunks, reader_stream, ChunkOptions, OrderedTransform, PipelineComposer,
    PipelineStatus, ProgressStage, Stage, ThrottleStage, TransformOptions, WriterSink,
    DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_FILE_CHUNK_SIZE,
};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "chunkflow-cli")]
#[command(about = "A CLI tool for chunked, concurrent file processing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into chunks and report per-chunk statistics
    Chunks {
        /// Input file to analyze
        input: PathBuf,

        /// Chunk size in bytes
        #[arg(short, long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Maximum chunks processed at once
        #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },

    /// Stream a file through a transform into an output file
    Copy {
        /// Input file
        input: PathBuf,

        /// Output file
        output: PathBuf,

        /// Case mapping applied to every chunk
        #[arg(long, value_enum, default_value_t = CaseMapping::Keep)]
        case: CaseMapping,

        /// Chunk size in bytes
        #[arg(short, long, default_value_t = DEFAULT_FILE_CHUNK_SIZE)]
        chunk_size: usize,

        /// Maximum chunks processed at once
        #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Limit throughput to this many bytes per second
        #[arg(long)]
        max_bytes_per_second: Option<u64>,

        /// Abort the run after this many seconds (0 disables the limit)
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Force overwrite of output file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CaseMapping {
    /// Copy bytes unchanged
    Keep,
    /// Convert ASCII letters to upper case
    Upper,
    /// Convert ASCII letters to lower case
    Lower,
}

impl CaseMapping {
    fn apply(self, data: Bytes) -> Bytes {
        match self {
            CaseMapping::Keep => data,
            CaseMapping::Upper => Bytes::from(data.to_ascii_uppercase()),
            CaseMapping::Lower => Bytes::from(data.to_ascii_lowercase()),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Chunks {
            input,
            chunk_size,
            concurrency,
        } => show_chunks(&input, chunk_size, concurrency, cli.verbose).await,
        Commands::Copy {
            input,
            output,
            case,
            chunk_size,
            concurrency,
            max_bytes_per_second,
            timeout,
            force,
        } => {
            let settings = CopySettings {
                case,
                chunk_size,
                concurrency,
                max_bytes_per_second,
                timeout: Duration::from_secs(timeout),
            };
            copy_file(&input, &output, settings, force, cli.verbose, cli.quiet).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_env(env_logger::Env::default())
            .filter_level(log::LevelFilter::Warn)
            .filter_module("chunkflow", log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }
}

async fn show_chunks(
    input: &Path,
    chunk_size: usize,
    concurrency: usize,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input file '{}' does not exist", input.display()).into());
    }

    let data = tokio::fs::read(input).await?;
    let file_size = data.len();
    let options = ChunkOptions::default()
        .with_chunk_size(chunk_size)
        .with_concurrency(concurrency);

    let started = Instant::now();
    let outcomes = process_in_chunks(
        data,
        |chunk, _| async move {
            let lines = chunk.iter().filter(|b| **b == b'\n').count();
            Ok::<_, Infallible>((chunk.len(), lines))
        },
        options,
    )
    .await?;

    println!("Chunk report for '{}':", input.display());
    println!("  File size:  {} bytes", file_size);
    println!("  Chunk size: {} bytes", chunk_size);
    println!("  Chunks:     {}", outcomes.len());
    if verbose {
        println!("  Time:       {:.2?}", started.elapsed());
    }

    for (index, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok((len, lines)) => println!("  [{:>5}] {:>10} bytes {:>8} lines", index, len, lines),
            Err(e) => println!("  [{:>5}] failed: {}", index, e),
        }
    }

    Ok(())
}

struct CopySettings {
    case: CaseMapping,
    chunk_size: usize,
    concurrency: usize,
    max_bytes_per_second: Option<u64>,
    timeout: Duration,
}

async fn copy_file(
    input: &Path,
    output: &Path,
    settings: CopySettings,
    force: bool,
    verbose: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Check if input file exists
    if !input.exists() {
        return Err(format!("Input file '{}' does not exist", input.display()).into());
    }

    // Check if output file exists and force flag
    if output.exists() && !force {
        return Err(format!(
            "Output file '{}' already exists. Use --force to overwrite",
            output.display()
        )
        .into());
    }

    let input_size = std::fs::metadata(input)?.len();
    if verbose {
        println!("Copying '{}' to '{}'", input.display(), output.display());
        println!(
            "Chunk size: {} bytes, concurrency: {}",
            settings.chunk_size, settings.concurrency
        );
    }

    let reader = tokio::fs::File::open(input).await?;
    let writer = tokio::fs::File::create(output).await?;

    let case = settings.case;
    let transform = OrderedTransform::new(
        move |data: Bytes, _: usize| async move { Ok::<_, Infallible>(case.apply(data)) },
        TransformOptions::default().with_concurrency(settings.concurrency),
    )?;

    let mut stages = vec![
        Stage::Source(reader_stream(reader, settings.chunk_size)?),
        Stage::transform(transform),
    ];
    if let Some(rate) = settings.max_bytes_per_second {
        stages.push(Stage::transform(ThrottleStage::new(rate)?));
    }

    // Show progress bar for large files
    let progress = if !quiet && input_size > 1024 * 1024 {
        let pb = ProgressBar::new(input_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}",
                )?
                .progress_chars("#>-"),
        );
        pb.set_message("Copying...");
        let bar = pb.clone();
        stages.push(Stage::transform(ProgressStage::new(move |bytes, _| {
            bar.set_position(bytes)
        })));
        Some(pb)
    } else {
        None
    };

    stages.push(Stage::sink(WriterSink::new(writer)));

    let timeout = (!settings.timeout.is_zero()).then_some(settings.timeout);
    let mut composer = PipelineComposer::new(stages).with_timeout(timeout);
    if verbose {
        composer = composer.on_progress(Duration::from_secs(1), |stats| {
            log::debug!(
                "{} chunks, {} bytes, {} errors",
                stats.processed_chunks,
                stats.total_bytes,
                stats.errors
            );
        });
    }

    let result = composer.run().await;

    if let Some(ref pb) = progress {
        match PipelineStatus::of(&result) {
            PipelineStatus::Completed => pb.finish_with_message("Copy complete"),
            PipelineStatus::TimedOut => pb.abandon_with_message("Timed out"),
            PipelineStatus::Failed => pb.abandon_with_message("Failed"),
        }
    }

    let stats = result?;
    if !quiet {
        println!("✓ Copy successful!");
        println!("  Chunks: {}", stats.processed_chunks);
        println!("  Bytes:  {}", stats.total_bytes);
        println!("  Time:   {:.2?}", stats.elapsed());
        println!(
            "  Rate:   {:.1} KB/s",
            stats.throughput_bytes_per_sec() / 1024.0
        );
    }

    Ok(())
}
