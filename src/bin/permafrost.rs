//! Permafrost CLI
//!
//! `freeze` creates an immutable archive bundle with provenance metadata;
//! `verify` checks an existing bundle at up to three levels. Every failure
//! maps to one exit code so callers can script against the outcome.

use chrono::Utc;
use clap::{Parser, Subcommand};
use permafrost::{
    format_size, freeze, EnvironmentMetadata, EventMetadata, FreezeConfig, FreezeRequest,
    PermafrostError, VerificationReport, Verifier, DEFAULT_FILELIST_THRESHOLD,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

// Exit code contract
const EXIT_SOURCE_NOT_FOUND: u8 = 2;
const EXIT_DESTINATION_INVALID: u8 = 3;
const EXIT_ARCHIVE_CREATION: u8 = 4;
const EXIT_ARCHIVE_CHECKSUM: u8 = 5;
const EXIT_FILE_CHECKSUM: u8 = 6;
const EXIT_MANIFEST_INVALID: u8 = 7;

#[derive(Parser, Debug)]
#[command(name = "permafrost")]
#[command(version)]
#[command(about = "Immutable, verifiable snapshot archives with provenance metadata")]
struct Cli {
    /// Logging level (error, warn, info, debug)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an immutable archive with comprehensive metadata
    Freeze {
        /// Source directory to archive
        source: PathBuf,

        /// Destination directory for the archive and its sidecars
        destination: PathBuf,

        /// Event name (e.g. "PNAS submission", "v1.0 release")
        #[arg(long)]
        milestone: Option<String>,

        /// Description note (repeatable)
        #[arg(long = "note")]
        notes: Vec<String>,

        /// Contact info (repeatable)
        #[arg(long = "contact")]
        contacts: Vec<String>,

        /// Gzip compression level (1=fastest, 9=smallest)
        #[arg(long, default_value_t = 6)]
        compression_level: u32,

        /// Custom archive name (default: <source>_<date>)
        #[arg(long)]
        name: Option<String>,

        /// Exclude pattern (repeatable)
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        /// Read exclusion patterns from the root .gitignore
        #[arg(long)]
        respect_ignore: bool,

        /// Keep version-control directories (.git, .hg, ...)
        #[arg(long)]
        keep_vcs: bool,

        /// Normalize archive member ownership to uid/gid 0
        #[arg(long)]
        numeric_owner_zero: bool,

        /// Entry count above which the file table moves to FILELIST.csv.gz
        #[arg(long, default_value_t = DEFAULT_FILELIST_THRESHOLD)]
        filelist_threshold: usize,

        /// Abort if any entry cannot be scanned
        #[arg(long)]
        strict: bool,
    },

    /// Verify archive integrity with multi-level checks
    Verify {
        /// Path to the archive (.tar.gz)
        archive: PathBuf,

        /// Also recompute every per-file content digest
        #[arg(long)]
        deep: bool,

        /// Path to the sidecar manifest (default: {base}.MANIFEST.json)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,

        /// Suppress output except errors
        #[arg(long)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match cli.command {
        Command::Freeze {
            source,
            destination,
            milestone,
            notes,
            contacts,
            compression_level,
            name,
            excludes,
            respect_ignore,
            keep_vcs,
            numeric_owner_zero,
            filelist_threshold,
            strict,
        } => {
            let mut config = FreezeConfig::default()
                .with_compression_level(compression_level)
                .with_excludes(excludes)
                .with_filelist_threshold(filelist_threshold);
            config.respect_ignore = respect_ignore;
            config.exclude_vcs = !keep_vcs;
            config.preserve_owner = !numeric_owner_zero;
            config.strict = strict;

            let now = Utc::now();
            let request = FreezeRequest {
                source,
                destination,
                archive_name: name,
                event: EventMetadata {
                    milestone,
                    notes,
                    contacts,
                    timestamp: Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                },
                git: None,
                environment: environment_block(),
                created_utc: now,
            };

            run_freeze(&request, &config)
        }
        Command::Verify {
            archive,
            deep,
            manifest,
            json,
            quiet,
        } => run_verify(&archive, deep, manifest, json, quiet),
    }
}

/// Host and tool facts recorded in the manifest
fn environment_block() -> EnvironmentMetadata {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    EnvironmentMetadata {
        hostname,
        username,
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        tool_version: permafrost::VERSION.to_string(),
    }
}

fn run_freeze(request: &FreezeRequest, config: &FreezeConfig) -> ExitCode {
    match freeze(request, config) {
        Ok(outcome) => {
            let counts = &outcome.manifest.archive.member_counts;
            println!("Archive:  {}", outcome.archive_path.display());
            println!(
                "Size:     {}",
                format_size(outcome.manifest.archive.size_bytes.unwrap_or(0))
            );
            println!(
                "Members:  {} files, {} directories, {} symlinks",
                counts.files, counts.dirs, counts.symlinks
            );
            if let Some(sha) = &outcome.manifest.archive.sha256 {
                println!("SHA256:   {sha}");
            }
            println!("Manifest: {}", outcome.manifest_path.display());
            if !outcome.scan_errors.is_empty() {
                eprintln!("Skipped {} unreadable entries:", outcome.scan_errors.len());
                for e in &outcome.scan_errors {
                    eprintln!("  {e}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("freeze failed: {e}");
            eprintln!("Error: {e}");
            ExitCode::from(error_exit_code(&e))
        }
    }
}

fn run_verify(
    archive: &std::path::Path,
    deep: bool,
    manifest: Option<PathBuf>,
    json: bool,
    quiet: bool,
) -> ExitCode {
    let verifier = match Verifier::new(archive, manifest) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(error_exit_code(&e));
        }
    };

    let report = match verifier.verify(deep) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(error_exit_code(&e));
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::from(EXIT_MANIFEST_INVALID);
            }
        }
    } else if !quiet {
        print_report(archive, deep, &report);
    } else if !report.overall {
        for finding in &report.findings {
            eprintln!("{finding}");
        }
    }

    ExitCode::from(verify_exit_code(&report))
}

fn print_report(archive: &std::path::Path, deep: bool, report: &VerificationReport) {
    println!("Archive:  {}", archive.display());
    println!("Level:    {}", if deep { "deep" } else { "quick" });
    println!(
        "Archive digest:   {}",
        if report.archive_ok { "OK" } else { "FAILED" }
    );
    println!(
        "Manifest:         {}",
        if report.manifest_ok { "OK" } else { "FAILED" }
    );
    if let Some(per_file) = &report.per_file {
        println!(
            "File digests:     {} checked, {} mismatched",
            per_file.checked,
            per_file.mismatched.len()
        );
    }
    if report.overall {
        println!("Result:   PASSED");
    } else {
        println!("Result:   FAILED");
        for finding in &report.findings {
            println!("  {finding}");
        }
    }
}

/// Map an error to the exit-code contract
fn error_exit_code(e: &PermafrostError) -> u8 {
    match e {
        PermafrostError::SourceNotFound(_)
        | PermafrostError::SourceNotADirectory(_)
        | PermafrostError::ArchiveNotFound(_) => EXIT_SOURCE_NOT_FOUND,
        PermafrostError::DestinationInvalid { .. } | PermafrostError::ArchiveExists(_) => {
            EXIT_DESTINATION_INVALID
        }
        PermafrostError::ManifestInvalid(_)
        | PermafrostError::ManifestNotFound(_)
        | PermafrostError::Json(_)
        | PermafrostError::Yaml(_) => EXIT_MANIFEST_INVALID,
        PermafrostError::InvalidCompressionLevel(_)
        | PermafrostError::InvalidPattern { .. }
        | PermafrostError::ScanIncomplete(_)
        | PermafrostError::EntryUnreadable { .. }
        | PermafrostError::Io(_) => EXIT_ARCHIVE_CREATION,
    }
}

/// Map a verification report to the exit-code contract
///
/// Archive-level failures win: a corrupt stream makes the other findings
/// unreliable diagnostics.
fn verify_exit_code(report: &VerificationReport) -> u8 {
    if report.overall {
        return 0;
    }
    if !report.archive_ok {
        return EXIT_ARCHIVE_CHECKSUM;
    }
    let files_failed = report
        .per_file
        .as_ref()
        .map(|p| !p.mismatched.is_empty())
        .unwrap_or(false);
    if files_failed {
        return EXIT_FILE_CHECKSUM;
    }
    EXIT_MANIFEST_INVALID
}
