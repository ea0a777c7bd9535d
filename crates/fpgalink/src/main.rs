mod cmd;
mod exit;
mod ingest;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "fpgalink",
    version,
    about = "Stream instructions to an FPGA accelerator over a serial link"
)]
struct Cli {
    /// Output format for result records.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        global = true,
        env = "FPGALINK_LOG_LEVEL"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::cmd::SimMode;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "fpgalink",
            "run",
            "program.jsonl",
            "--simulate",
            "--sim-behavior",
            "wrong-seq",
            "--batch-linger",
            "5ms",
        ])
        .expect("run args should parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.input, Some(PathBuf::from("program.jsonl")));
        assert!(args.simulate);
        assert_eq!(args.sim_behavior, SimMode::WrongSeq);
        assert_eq!(args.batch_linger, Some(Duration::from_millis(5)));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["fpgalink", "run", "--format", "pretty", "--log-level", "debug"])
            .expect("global flags should parse after the subcommand");
        assert_eq!(cli.format, Some(OutputFormat::Pretty));
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn rejects_bad_duration() {
        let err = Cli::try_parse_from(["fpgalink", "run", "--response-timeout", "soon"])
            .expect_err("bad duration should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_version_subcommand() {
        let cli = Cli::try_parse_from(["fpgalink", "version", "--extended"])
            .expect("version args should parse");
        assert!(matches!(cli.command, Command::Version(args) if args.extended));
    }
}
