//! `svv`: command-line front end for `signed_video_validator`. Streams a raw
//! Annex-B elementary stream or MP4 file through a `Session` and prints the
//! settled `AuthenticityReport`s as JSON.

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use signed_video_validator::source::nalu_source_from_path;
use signed_video_validator::verifier::{AcceptAllVerifier, RejectAllVerifier};
use signed_video_validator::{AuthenticityLevel, AuthenticityReport, Codec, Session, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CodecArg {
    H264,
    H265,
}

impl From<CodecArg> for Codec {
    fn from(value: CodecArg) -> Self {
        match value {
            CodecArg::H264 => Codec::H264,
            CodecArg::H265 => Codec::H265,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LevelArg {
    Gop,
    Frame,
}

impl From<LevelArg> for AuthenticityLevel {
    fn from(value: LevelArg) -> Self {
        match value {
            LevelArg::Gop => AuthenticityLevel::Gop,
            LevelArg::Frame => AuthenticityLevel::Frame,
        }
    }
}

/// Validate the chained-hash authenticity of an H.264/H.265 stream.
#[derive(Parser, Debug)]
#[command(name = "svv", version, about, long_about = None)]
struct Cli {
    /// Input file: a raw Annex-B elementary stream, or an MP4 container.
    input: PathBuf,

    /// Write output here instead of stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Codec to assume for a raw elementary stream. Ignored for MP4 input,
    /// where the container's own `avcC`/`hvcC` box decides.
    #[arg(long, value_enum, default_value_t = CodecArg::H264)]
    codec: CodecArg,

    /// Authenticity granularity: whole-GOP verdicts, or per-frame ones via
    /// the signer's hash list.
    #[arg(long, value_enum, default_value_t = LevelArg::Gop)]
    level: LevelArg,

    /// Print every settled report as a JSON array, not just the last one.
    #[arg(long)]
    all: bool,

    /// Accept every signature without actually verifying it. This crate
    /// ships no concrete public-key scheme, so without a real `Verifier`
    /// wired in by an integrator this is the only way `svv` can run past
    /// the first signed GOP; it turns off the one guarantee that matters.
    #[arg(long, conflicts_with = "insecure_reject_all")]
    insecure_accept_all: bool,

    /// Reject every signature without actually verifying it. Exercises the
    /// `NotOk` reporting path without a real `Verifier`; as insecure as
    /// `--insecure-accept-all`, just pointed the other way.
    #[arg(long, conflicts_with = "insecure_accept_all")]
    insecure_reject_all: bool,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn install_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    if verbose == 0 {
        return;
    }
    let level = match verbose {
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn should_write_to_stdout(output: &Option<PathBuf>) -> bool {
    match output {
        None => true,
        Some(path) => path.as_os_str() == "-",
    }
}

fn run(cli: &Cli, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    let source = nalu_source_from_path(&cli.input, cli.codec.into())?;

    let mut config = SessionConfig::new(source.codec());
    config.authenticity_level = cli.level.into();
    let mut session = Session::with_config(config);

    if cli.insecure_accept_all {
        session.set_verifier(Box::new(AcceptAllVerifier));
    } else if cli.insecure_reject_all {
        session.set_verifier(Box::new(RejectAllVerifier));
    }

    let mut reports: Vec<AuthenticityReport> = Vec::new();
    for nalu in source {
        match session.add_nalu_and_authenticate(&nalu) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(err) => return Err(Box::new(err)),
        }
    }

    if cli.all {
        serde_json::to_writer_pretty(&mut *out, &reports)?;
    } else {
        match reports.last() {
            Some(report) => serde_json::to_writer_pretty(&mut *out, report)?,
            None => write!(out, "null")?,
        }
    }
    writeln!(out)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_logging(cli.verbose);

    let result = if should_write_to_stdout(&cli.output) {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        run(&cli, &mut out).and_then(|()| out.flush().map_err(Into::into))
    } else {
        let path = cli.output.as_ref().expect("checked by should_write_to_stdout");
        match std::fs::File::create(path) {
            Ok(file) => {
                let mut out = BufWriter::new(file);
                run(&cli, &mut out).and_then(|()| out.flush().map_err(Into::into))
            }
            Err(err) => Err(Box::new(err)),
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("svv: {err}");
            ExitCode::FAILURE
        }
    }
}
