pub mod assertions;
pub mod codec;
pub mod config;
#[cfg(unix)]
pub mod demo;
pub mod errors;
pub mod interceptor;
pub mod log_retention;
pub mod logging;
pub mod registry;
pub mod replay;
pub mod reporter;
pub mod runtime;
pub mod session;
pub mod types;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use config::{load_config, ConfigOverrides, IsolateConfig};
use errors::IsolateError;
use registry::OverrideRegistry;
use replay::ReplayPolicy;
use reporter::{TapReporter, TestReporter};
use std::io::Write;
use std::path::{Path, PathBuf};

pub use interceptor::AssertionContext;
#[cfg(unix)]
pub use session::run_isolated;
pub use session::{Isolator, SessionOutcome};

#[derive(Debug, Clone, Parser)]
#[command(name = "isolate")]
#[command(about = "Run assertions in a forked child and replay them in the parent")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
    #[arg(long = "capture-dir")]
    pub capture_dir: Option<PathBuf>,
    #[arg(long = "on-error", value_parser = parse_policy)]
    pub on_error: Option<ReplayPolicy>,
    #[arg(long = "log-path")]
    pub log_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Decode a saved child message and list its records.
    Inspect { file: PathBuf },
    /// Replay a saved child message as TAP on stdout.
    Replay { file: PathBuf },
    /// Run the built-in isolation scenarios.
    Demo,
}

fn parse_policy(raw: &str) -> Result<ReplayPolicy, String> {
    match raw {
        "continue" => Ok(ReplayPolicy::Continue),
        "abort" => Ok(ReplayPolicy::Abort),
        other => Err(format!("unknown replay policy `{other}` (expected continue or abort)")),
    }
}

pub fn run() -> Result<i32, IsolateError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_args(&args, &mut out)
}

pub fn run_with_args(
    args: &[std::ffi::OsString],
    out: &mut dyn Write,
) -> Result<i32, IsolateError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write!(out, "{error}").map_err(io_error)?;
                return Ok(0);
            }
            _ => return Err(IsolateError::Cli(error.to_string())),
        },
    };

    let overrides = ConfigOverrides {
        timeout_ms: cli.timeout_ms,
        capture_dir: cli.capture_dir.clone(),
        on_error: cli.on_error,
        log_path: cli.log_path.clone(),
    };
    let cfg = load_config(cli.config.as_deref(), &overrides)?;

    match &cli.command {
        Command::Inspect { file } => inspect(file, out),
        Command::Replay { file } => replay_file(&cfg, file, out),
        Command::Demo => demo(&cfg, out),
    }
}

fn inspect(file: &Path, out: &mut dyn Write) -> Result<i32, IsolateError> {
    let records = codec::decode(&read_message(file)?)?;
    for (index, record) in records.iter().enumerate() {
        let args = serde_json::to_string(record.args())
            .map_err(|e| IsolateError::Encode(e.to_string()))?;
        let site = record.call_site();
        writeln!(
            out,
            "{} {} at {}:{} args={args}",
            index + 1,
            record.target,
            site.file,
            site.line
        )
        .map_err(io_error)?;
    }
    Ok(0)
}

fn replay_file(cfg: &IsolateConfig, file: &Path, out: &mut dyn Write) -> Result<i32, IsolateError> {
    let records = codec::decode(&read_message(file)?)?;
    let registry = OverrideRegistry::with_library();
    let mut tap = TapReporter::new(&mut *out);
    let summary = replay::replay(&registry, &mut tap, &records, cfg.replay.on_error)?;
    tap.plan();
    Ok(if summary.clean() { 0 } else { 1 })
}

#[cfg(unix)]
fn demo(cfg: &IsolateConfig, out: &mut dyn Write) -> Result<i32, IsolateError> {
    let mut tap = TapReporter::new(&mut *out);
    demo::run_scenarios(cfg, &mut tap)?;
    tap.plan();
    // The crashing scenario fails on purpose; anything else failing is a real failure.
    let summary = tap.summary();
    Ok(if summary.failed == 1 { 0 } else { 1 })
}

#[cfg(not(unix))]
fn demo(_cfg: &IsolateConfig, _out: &mut dyn Write) -> Result<i32, IsolateError> {
    Err(IsolateError::Spawn(
        "process isolation requires a unix host".to_string(),
    ))
}

fn read_message(file: &Path) -> Result<Vec<u8>, IsolateError> {
    std::fs::read(file).map_err(|e| IsolateError::Io(format!("{}: {e}", file.display())))
}

fn io_error(error: std::io::Error) -> IsolateError {
    IsolateError::Io(error.to_string())
}

pub fn render_help() -> String {
    let mut cmd = Cli::command();
    cmd.render_long_help().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallSite, CapturedCall, Target};
    use serde_json::json;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    fn write_message(dir: &Path, records: &[CapturedCall]) -> PathBuf {
        let path = dir.join("session.msg");
        std::fs::write(&path, codec::encode(records).expect("encode")).expect("write");
        path
    }

    fn record(name: &str, args: Vec<serde_json::Value>, line: u32) -> CapturedCall {
        CapturedCall::new(
            Target::new("main", name),
            CallSite {
                caller: "main".to_string(),
                file: "tests/child.rs".to_string(),
                line,
                column: 1,
            },
            args,
        )
    }

    #[test]
    fn help_lists_subcommands() {
        let help = render_help();
        for word in ["inspect", "replay", "demo", "--config"] {
            assert!(help.contains(word), "missing {word}");
        }
    }

    #[test]
    fn inspect_prints_one_line_per_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_message(
            dir.path(),
            &[
                record("ok", vec![json!(true), json!("first")], 3),
                record("is", vec![json!(1), json!(1), json!("second")], 4),
            ],
        );
        let mut out = Vec::new();
        let code = run_with_args(
            &args(&["isolate", "inspect", path.to_str().expect("utf8 path")]),
            &mut out,
        )
        .expect("inspect");
        assert_eq!(code, 0);
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "1 main::ok at tests/child.rs:3 args=[true,\"first\"]\n\
             2 main::is at tests/child.rs:4 args=[1,1,\"second\"]\n"
        );
    }

    #[test]
    fn replay_exits_nonzero_when_a_record_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_message(
            dir.path(),
            &[
                record("pass", vec![json!("good")], 3),
                record("is", vec![json!(1), json!(2), json!("bad")], 4),
            ],
        );
        let mut out = Vec::new();
        let code = run_with_args(
            &args(&["isolate", "replay", path.to_str().expect("utf8 path")]),
            &mut out,
        )
        .expect("replay");
        assert_eq!(code, 1);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("ok 1 - good\nnot ok 2 - bad\n"));
        assert!(text.ends_with("1..2\n"));
    }

    #[test]
    fn unknown_subcommand_is_a_cli_error() {
        let mut out = Vec::new();
        let err = run_with_args(&args(&["isolate", "explode"]), &mut out).expect_err("cli");
        assert!(matches!(err, IsolateError::Cli(_)));
    }

    #[test]
    fn bad_policy_flag_is_rejected() {
        let mut out = Vec::new();
        let err = run_with_args(
            &args(&["isolate", "--on-error", "retry", "demo"]),
            &mut out,
        )
        .expect_err("policy");
        assert!(matches!(err, IsolateError::Cli(_)));
    }
}
