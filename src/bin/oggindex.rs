use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use oggindex::{validate, IndexConfig, Rewriter, ValidationReport};

#[derive(Parser, Debug)]
#[command(name = "oggindex")]
#[command(about = "Index an Ogg file to allow faster seeking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write an indexed copy of an Ogg file
    Index {
        /// Input Ogg file
        input: PathBuf,

        /// Output filename (default: <input>.indexed.ogg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum interval in ms between caption keyframes
        #[arg(short = 'i', long = "interval", default_value = "2000")]
        interval: i64,

        /// Verify the index in the output file after writing
        #[arg(short = 'v', long)]
        verify: bool,

        /// Dump packet info to stdout
        #[arg(short = 'd', long)]
        dump_packets: bool,

        /// Dump only keyframe packet info to stdout
        #[arg(short = 'k', long)]
        dump_key_packets: bool,

        /// Dump page info to stdout
        #[arg(short = 'p', long)]
        dump_pages: bool,

        /// Show verbose statistics
        #[arg(long)]
        verbose: bool,
    },
    /// Validate the index in an already indexed Ogg file
    Validate {
        /// Indexed Ogg file
        input: PathBuf,

        /// Minimum interval in ms between caption keyframes
        #[arg(short = 'i', long = "interval", default_value = "2000")]
        interval: i64,
    },
}

const EXIT_OK: u8 = 0;
const EXIT_FAIL: u8 = 1;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_FAIL)
        }
    }
}

fn run() -> Result<u8, Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Index {
            input,
            output,
            interval,
            verify,
            dump_packets,
            dump_key_packets,
            dump_pages,
            verbose,
        } => {
            let config = IndexConfig {
                keypoint_interval_ms: interval,
                dump_packets,
                dump_key_packets,
                dump_pages,
                verbose,
            };
            run_index(&input, output, config, verify)
        }
        Command::Validate { input, interval } => {
            let config = IndexConfig { keypoint_interval_ms: interval, ..Default::default() };
            run_validate(&input, &config)
        }
    }
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("indexed.ogg")
}

fn run_index(
    input: &Path,
    output: Option<PathBuf>,
    config: IndexConfig,
    verify: bool,
) -> Result<u8, Box<dyn std::error::Error>> {
    let output_path = output.unwrap_or_else(|| default_output(input));
    let input_file = BufReader::new(File::open(input)?);
    let output_file = BufWriter::new(File::create(&output_path)?);

    let start = Instant::now();
    let stats = match Rewriter::new(config.clone()).rewrite(input_file, output_file) {
        Ok(stats) => stats,
        Err(e) => {
            // Leave no partial output behind.
            let _ = std::fs::remove_file(&output_path);
            return Err(e.into());
        }
    };
    let elapsed = start.elapsed();

    if config.verbose {
        eprintln!("Indexing complete:");
        eprintln!("  Pages read:       {}", stats.pages_read);
        eprintln!("  Tracks indexed:   {}", stats.tracks_indexed);
        eprintln!("  Index track:      {} bytes", stats.index_bytes);
        if stats.old_index_bytes > 0 {
            eprintln!("  Replaced index:   {} bytes", stats.old_index_bytes);
        }
        eprintln!("  Output length:    {} bytes", stats.file_length);
        eprintln!("  Content offset:   {}", stats.content_offset);
        eprintln!("  Time:             {:.2?}", elapsed);
    }

    if verify {
        eprintln!("Validating keyframe indexes...");
        let report = validate(BufReader::new(File::open(&output_path)?), &config)?;
        print_report(&report);
        if !report.is_valid() {
            eprintln!("FAIL: verification of the index failed");
            return Ok(EXIT_FAIL);
        }
        eprintln!("SUCCESS: index is valid");
    }

    Ok(EXIT_OK)
}

fn run_validate(input: &Path, config: &IndexConfig) -> Result<u8, Box<dyn std::error::Error>> {
    let report = validate(BufReader::new(File::open(input)?), config)?;
    print_report(&report);
    if report.is_valid() {
        eprintln!("SUCCESS: index is valid");
        Ok(EXIT_OK)
    } else {
        eprintln!("FAIL: index is not valid");
        Ok(EXIT_FAIL)
    }
}

fn print_report(report: &ValidationReport) {
    eprintln!("Skeleton track: {}", if report.has_skeleton { "present" } else { "MISSING" });
    if !report.has_skeleton {
        return;
    }
    eprintln!(
        "File length: reported {} actual {} ({})",
        report.reported_file_length,
        report.actual_file_length,
        if report.file_length_ok { "ok" } else { "MISMATCH" }
    );
    eprintln!(
        "Content offset: reported {} actual {} ({})",
        report.reported_content_offset,
        report.actual_content_offset,
        if report.content_offset_ok { "ok" } else { "MISMATCH" }
    );
    for track in &report.tracks {
        eprintln!(
            "{}/{}: {} keypoints, max window {} bytes (optimal {}) - {}",
            track.kind,
            track.serial,
            track.keypoints,
            track.max_window,
            track.optimal_window,
            if track.accurate { "accurate" } else { "NOT ACCURATE" }
        );
    }
}
