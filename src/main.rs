use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use globset::GlobSet;
use is_terminal::IsTerminal;

mod convert;
mod encoding;
mod logging;
mod report;
mod stats;
mod walk;

use convert::{Outcome, Request};
use encoding::EncodingId;
use logging::{FileRecord, RunLog};
use stats::RunStats;
use walk::FileEntry;

const DEFAULT_MASKS: &str = "*.txt,*.cs,*.xml,*.xaml,*.htm,*.html,*.c,*.cpp,*.h,*.js,*.asm";
const DEFAULT_LOG: &str = "recode.log";
const TITLE_WIDTH: usize = 95;

/// Walks a directory tree and rewrites text files whose encoding differs
/// from the target, streaming line by line so whole files never sit in
/// memory.
#[derive(Debug, Parser)]
#[command(name = "recode", version, about)]
struct Cli {
    /// Files or directories to process; defaults to the current directory.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Target encoding label or code-page number.
    #[arg(short = 'e', long = "encoding", default_value = "utf-8")]
    encoding: String,

    /// Encoding assumed for files whose encoding cannot be detected.
    #[arg(long = "default-encoding", default_value = "windows-1252")]
    default_encoding: String,

    /// File masks, separated by comma, semicolon or pipe.
    #[arg(short = 'f', long = "files", default_value = DEFAULT_MASKS)]
    files: String,

    /// Do not descend into subdirectories.
    #[arg(short = 'n', long = "no-sub-dirs")]
    no_sub_dirs: bool,

    /// Report what would change without writing anything.
    #[arg(short = 't', long = "test-only")]
    test_only: bool,

    /// Code-page numbers to leave unconverted even when they differ from
    /// the target.
    #[arg(long = "suppress", value_name = "CODES")]
    suppress: Option<String>,

    /// Write a JSONL run log; an existing log is truncated at run start.
    #[arg(
        short = 'l',
        long = "log",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = DEFAULT_LOG
    )]
    log: Option<PathBuf>,
}

/// Immutable run configuration, built once from the command line and
/// shared read-only by every component.
struct Config {
    target: EncodingId,
    fallback: EncodingId,
    patterns: GlobSet,
    recurse: bool,
    test_only: bool,
    suppressed: Vec<u16>,
}

impl Config {
    fn path_width(&self) -> usize {
        if self.test_only { 83 } else { 60 }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let mut log = match cli.log.as_deref() {
        Some(path) => RunLog::create(path)?,
        None => RunLog::disabled(),
    };

    let paths = if cli.paths.is_empty() {
        vec![std::env::current_dir().context("unable to resolve the current directory")?]
    } else {
        cli.paths.clone()
    };

    for path in &paths {
        if path.is_file() {
            process_single(path, &config, &mut log)?;
        } else if path.is_dir() {
            process_directory(path, &config, &mut log)?;
        } else {
            bail!("{} is neither a file nor a directory", path.display());
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<Config> {
    let target = EncodingId::resolve(&cli.encoding)
        .with_context(|| format!("invalid target encoding '{}'", cli.encoding))?;
    let fallback = EncodingId::resolve(&cli.default_encoding)
        .with_context(|| format!("invalid default encoding '{}'", cli.default_encoding))?;

    let masks = split_list(&cli.files);
    if masks.is_empty() {
        bail!("no file masks given");
    }
    let patterns = walk::build_patterns(&masks)?;

    let suppressed = match cli.suppress.as_deref() {
        Some(codes) => split_list(codes)
            .iter()
            .map(|code| {
                code.parse::<u16>()
                    .with_context(|| format!("invalid suppressed code page '{code}'"))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(Config {
        target,
        fallback,
        patterns,
        recurse: !cli.no_sub_dirs,
        test_only: cli.test_only,
        suppressed,
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';', '|'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// One sequential pass over a directory: walk, detect, convert, count.
/// Walker failures are fatal; everything per-file is an outcome.
fn process_directory(root: &Path, config: &Config, log: &mut RunLog) -> Result<RunStats> {
    let shown_root = report::trim_middle(&root.display().to_string(), TITLE_WIDTH);
    let title = format!("Processing files in {shown_root}");
    println!("{title}");
    log.note(&title);
    println!("{:>20}{:>7}{:>11}  File", "Encoding", "Code", "Length");

    let mut stats = RunStats::new();
    for entry in walk::walk(root, &config.patterns, config.recurse) {
        let entry = entry.with_context(|| format!("enumerating {}", root.display()))?;
        let outcome = process_entry(&entry, Some(root), config, log);
        stats.record(&outcome);
    }

    println!("Processing of {shown_root} completed.");
    log.note(&format!("Processing of {} completed.", root.display()));
    for line in stats.summary(config.test_only) {
        println!("\t{line}");
        log.note(&line);
    }
    Ok(stats)
}

fn process_single(path: &Path, config: &Config, log: &mut RunLog) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;
    let entry = FileEntry {
        path: path.to_path_buf(),
        len: metadata.len(),
    };
    process_entry(&entry, None, config, log);
    Ok(())
}

fn process_entry(
    entry: &FileEntry,
    base: Option<&Path>,
    config: &Config,
    log: &mut RunLog,
) -> Outcome {
    let rel = relative_display(&entry.path, base);

    let detected = match encoding::detect_file(&entry.path) {
        Ok(detected) => detected,
        Err(err) => {
            let outcome = convert::classify(err);
            let prefix = report::file_line("???", None, entry.len, &rel, config.path_width());
            println!("{prefix} - {}", describe(&outcome));
            record(log, &rel, "???", None, entry.len, &outcome);
            return outcome;
        }
    };

    let name = detected.map_or("???", |id| id.name());
    let code = detected.map(|id| id.code_page());
    let prefix = report::file_line(name, code, entry.len, &rel, config.path_width());

    // Live progress only makes sense on a terminal; piped output gets
    // one final line per file.
    let interactive = io::stdout().is_terminal();
    let mut progress = |fraction: f64| {
        if interactive {
            print!("\r{prefix} - {:6.2}%", fraction * 100.0);
            let _ = io::stdout().flush();
        }
    };

    let request = Request {
        path: &entry.path,
        len: entry.len,
        detected,
        fallback: config.fallback,
        target: config.target,
    };
    let outcome = convert::process(&request, &config.suppressed, config.test_only, &mut progress);

    if matches!(outcome, Outcome::Skipped) {
        // Files already in the target encoding pass silently.
        return outcome;
    }

    if interactive {
        println!("\r{prefix} - {}", describe(&outcome));
    } else {
        println!("{prefix} - {}", describe(&outcome));
    }
    record(log, &rel, name, code, entry.len, &outcome);
    outcome
}

fn record(
    log: &mut RunLog,
    rel: &str,
    name: &str,
    code: Option<u16>,
    len: u64,
    outcome: &Outcome,
) {
    let timestamp = logging::now();
    log.file(&FileRecord {
        timestamp: &timestamp,
        path: rel,
        encoding: name,
        code_page: code,
        bytes: len,
        status: status_tag(outcome),
    });
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Skipped => "skipped".into(),
        Outcome::Suppressed => "suppressed".into(),
        Outcome::Converted { dry_run: true, .. } => "would convert".into(),
        Outcome::Converted { lines, .. } => format!("processed {lines} lines"),
        Outcome::IoError(err) => format!("error:I/O ({err})"),
        Outcome::AccessError(err) => format!("error:access rights ({err})"),
    }
}

fn status_tag(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Skipped => "skipped",
        Outcome::Suppressed => "suppressed",
        Outcome::Converted { dry_run: true, .. } => "would-convert",
        Outcome::Converted { .. } => "processed",
        Outcome::IoError(_) => "error-io",
        Outcome::AccessError(_) => "error-access",
    }
}

fn relative_display(path: &Path, base: Option<&Path>) -> String {
    match base.and_then(|base| path.strip_prefix(base).ok()) {
        Some(rel) => rel.display().to_string(),
        None => path.display().to_string(),
    }
}
