//! Purpose: `distgen` CLI entry point: argument parsing, logging setup and output envelopes.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Command results are JSON on stdout; logs go to stderr through `tracing`.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use num_bigint::BigUint;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use distgen::api::{HashEncoding, JobConfig};
use distgen::core::error::{Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }

    fn finished(interrupted: bool) -> Self {
        if interrupted {
            Self::with_code(to_exit_code(ErrorKind::Interrupted))
        } else {
            Self::ok()
        }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint(clap_error_hint(&err)));
            }
        },
    };

    init_tracing();
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "distgen",
    version,
    about = "Enumerate keyspaces into digest indexes, locally or across a work queue",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Every string of a fixed length over a charset has an ordinal. Ranges of ordinals
are cut into blocks; each block becomes one file of JSON lines:
  {"preimage": "...", "<algorithm>": "<base64 digest prefix>", ...}

Mental model:
  - `keyspace` shows what a job would cover
  - `fill` enqueues blocks, `work` consumes them (many processes may share a queue)
  - `local` does both in one process
  - `index` digests a wordlist, `lookup` searches any of these outputs
"#,
    after_help = r#"EXAMPLES
  $ distgen keyspace -k 4 -a md5
  $ distgen local -k 3 -a md5 sha1 -o ./out
  $ distgen fill -k 5 -a all --queue-dir ./spool
  $ distgen work -a all --queue-dir ./spool --sink-dir ./bucket --drain
  $ distgen lookup -a md5 -e hex 5f4dcc3b5aa765d61d8327deb882cf99 --index words.idx

LEARN MORE
  $ distgen <command> --help
  RUST_LOG=debug shows per-batch detail on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct CharsetArgs {
    #[arg(
        short = 'c',
        long = "charset",
        help = "Ordered symbols of the numeral system (default: printable ASCII, 95 symbols)"
    )]
    charset: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct DigestArgs {
    #[arg(
        short = 'a',
        long = "algorithms",
        num_args = 1..,
        value_delimiter = ',',
        required = true,
        help = "Digest algorithms: all, md5, sha1, sha224, sha256, sha384, sha512, sha3_256, sha3_512, blake3"
    )]
    algorithms: Vec<String>,
    #[arg(long, default_value_t = 6, help = "Bytes of each digest to keep")]
    truncate: usize,
    #[arg(long, conflicts_with = "truncate", help = "Keep whole digests")]
    full_digest: bool,
}

#[derive(Args, Clone, Debug)]
struct RangeArgs {
    #[arg(short = 'k', long = "keyspace", help = "Length of the strings to enumerate (1-8)")]
    chars_len: usize,
    #[arg(
        short = 'i',
        long,
        help = "Start at ordinal 0 instead of one past the shorter length class"
    )]
    inclusive: bool,
    #[arg(short = 's', long, value_parser = parse_ordinal, help = "Skip the first N entries of the range")]
    skip: Option<BigUint>,
    #[arg(short = 'l', long, value_parser = parse_ordinal, help = "Limit the range to N entries")]
    limit: Option<BigUint>,
}

impl DigestArgs {
    fn truncate(&self) -> Option<usize> {
        if self.full_digest {
            None
        } else {
            Some(self.truncate)
        }
    }
}

fn job_config(
    charset: &CharsetArgs,
    digest: &DigestArgs,
    range: Option<&RangeArgs>,
    block_size: Option<BigUint>,
) -> JobConfig {
    let mut job = JobConfig {
        charset: charset.charset.clone(),
        algorithms: digest.algorithms.clone(),
        truncate: digest.truncate(),
        block_size,
        ..JobConfig::default()
    };
    if let Some(range) = range {
        job.chars_len = range.chars_len;
        job.inclusive = range.inclusive;
        job.skip = range.skip.clone();
        job.limit = range.limit.clone();
    }
    job
}

fn parse_ordinal(value: &str) -> Result<BigUint, String> {
    value
        .trim()
        .parse::<BigUint>()
        .map_err(|_| format!("expected a non-negative integer, got {value:?}"))
}

fn parse_millis(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("expected milliseconds, got {value:?}"))
}

fn parse_encoding(value: &str) -> Result<HashEncoding, String> {
    value.parse()
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("expected seconds, got {value:?}"))
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Show a job's range, block plan and estimated output size",
        long_about = r#"Resolve the ordinal range for a job without doing any work.

Prints the range, entry count, block size, block count and an estimate of the
total output size."#,
        after_help = r#"EXAMPLES
  $ distgen keyspace -k 4 -a md5
  $ distgen keyspace -k 6 -c abc123 -a all -B 1000 --skip 50"#
    )]
    Keyspace {
        #[command(flatten)]
        charset: CharsetArgs,
        #[command(flatten)]
        digest: DigestArgs,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(short = 'B', long, value_parser = parse_ordinal, help = "Entries per block (default: range end / 32000 + 1)")]
        block_size: Option<BigUint>,
    },
    #[command(
        about = "Cut a range into blocks and enqueue them",
        long_about = r#"Partition a job's range into blocks and enqueue one message per block.

Messages carry {"start": N, "stop": M} with ordinals as plain JSON integers."#,
        after_help = r#"EXAMPLES
  $ distgen fill -k 5 -a md5 --queue-dir ./spool
  $ DISTGEN_BLOCK_SIZE=100000 distgen fill -k 6 -a all --queue-dir ./spool"#
    )]
    Fill {
        #[command(flatten)]
        charset: CharsetArgs,
        #[command(flatten)]
        digest: DigestArgs,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(short = 'B', long, env = "DISTGEN_BLOCK_SIZE", value_parser = parse_ordinal, help = "Entries per block [default: 500000]")]
        block_size: Option<BigUint>,
        #[arg(long, env = "DISTGEN_QUEUE_DIR", help = "Spool directory backing the work queue")]
        queue_dir: PathBuf,
    },
    #[command(
        about = "Consume blocks from a queue and upload their output",
        long_about = r#"Run worker threads against a spool queue.

Each block is enumerated into a local file, uploaded to the sink, removed locally,
and only then acknowledged. Failed blocks stay on the queue and are redelivered
after the visibility timeout."#,
        after_help = r#"EXAMPLES
  $ distgen work -a md5 --queue-dir ./spool --sink-dir ./bucket
  $ distgen work -a all --queue-dir ./spool --sink-url http://minio:9000/keyspace --workers 4
  $ distgen work -a md5 --queue-dir ./spool --sink-dir ./bucket --drain"#
    )]
    Work {
        #[command(flatten)]
        charset: CharsetArgs,
        #[command(flatten)]
        digest: DigestArgs,
        #[arg(long, env = "DISTGEN_QUEUE_DIR", help = "Spool directory backing the work queue")]
        queue_dir: PathBuf,
        #[arg(long, env = "DISTGEN_SINK_DIR", conflicts_with = "sink_url", help = "Upload finished blocks into this directory")]
        sink_dir: Option<PathBuf>,
        #[arg(long, env = "DISTGEN_SINK_URL", help = "Upload finished blocks with PUT {url}/{key}")]
        sink_url: Option<String>,
        #[arg(long, env = "DISTGEN_SINK_TOKEN", hide_env_values = true, help = "Bearer token for --sink-url")]
        sink_token: Option<String>,
        #[arg(long, help = "Scratch directory for in-progress block files (default: system temp)")]
        work_dir: Option<PathBuf>,
        #[arg(long, help = "Worker threads (default: number of CPUs)")]
        workers: Option<usize>,
        #[arg(long = "poll-interval-ms", value_parser = parse_millis, default_value = "1000", help = "Wait between empty polls")]
        poll_interval: Duration,
        #[arg(long = "visibility-timeout", value_parser = parse_secs, default_value = "1800", help = "Seconds before an unacknowledged block is redelivered")]
        visibility_timeout: Duration,
        #[arg(long, help = "Exit once the queue has no visible messages")]
        drain: bool,
    },
    #[command(
        about = "Enumerate a range with an in-process worker pool",
        long_about = r#"Enumerate a job's range without an external queue.

Blocks flow through a bounded in-memory queue to a fixed pool of threads; worker N
writes generated_keyspace_{keyspace}_{N}.json in the output directory."#,
        after_help = r#"EXAMPLES
  $ distgen local -k 3 -a md5 -o ./out
  $ distgen local -k 4 -c 0123456789 -a sha256 --full-digest --workers 2"#
    )]
    Local {
        #[command(flatten)]
        charset: CharsetArgs,
        #[command(flatten)]
        digest: DigestArgs,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(short = 'B', long, value_parser = parse_ordinal, help = "Entries per block (default: range end / 32000 + 1)")]
        block_size: Option<BigUint>,
        #[arg(short = 'o', long, default_value = ".", help = "Output directory")]
        output: PathBuf,
        #[arg(long, help = "Worker threads (default: number of CPUs)")]
        workers: Option<usize>,
        #[arg(long = "status-interval", value_parser = parse_secs, default_value = "10", help = "Seconds between progress log lines")]
        status_interval: Duration,
    },
    #[command(
        about = "Index a wordlist",
        long_about = r#"Compute digests for every line of a wordlist.

Lines are trimmed; lines that are not UTF-8 are skipped and logged. Digests are
kept whole unless --truncate is given."#,
        after_help = r#"EXAMPLES
  $ distgen index -w rockyou.txt -a md5 sha1 -o rockyou.idx
  $ distgen index -w more.txt -a md5 -o rockyou.idx --append"#
    )]
    Index {
        #[arg(short = 'w', long, help = "Wordlist to read, one word per line")]
        wordlist: PathBuf,
        #[arg(
            short = 'a',
            long = "algorithms",
            num_args = 1..,
            value_delimiter = ',',
            required = true,
            help = "Digest algorithms: all or a list of names"
        )]
        algorithms: Vec<String>,
        #[arg(long, help = "Bytes of each digest to keep (default: whole digest)")]
        truncate: Option<usize>,
        #[arg(short = 'o', long, help = "Index file to write")]
        output: PathBuf,
        #[arg(long, conflicts_with = "overwrite", help = "Append to an existing index")]
        append: bool,
        #[arg(long, help = "Replace an existing index")]
        overwrite: bool,
        #[arg(long = "status-interval", value_parser = parse_secs, default_value = "10", help = "Seconds between progress log lines")]
        status_interval: Duration,
    },
    #[command(
        about = "Find the preimages of hashes in one or more indexes",
        long_about = r#"Stream index files and report every row whose digest matches a query.

A row matches when its digest and the query agree on their common prefix, so
full hashes can be looked up in truncated indexes and the reverse. Results carry
the queried hash in base64."#,
        after_help = r#"EXAMPLES
  $ distgen lookup -a md5 X03MO1qnZdYdgyfeuILPmQ== --index words.idx
  $ distgen lookup -a md5 -e hex 5f4dcc3b5aa765d61d8327deb882cf99 --index a.idx b.idx
  $ distgen lookup -a sha1 -f hashes.txt --index ./out/*.json"#
    )]
    Lookup {
        #[arg(short = 'a', long = "algorithm", help = "Index column to match, e.g. md5")]
        algorithm: String,
        #[arg(short = 'e', long = "encoding", value_parser = parse_encoding, default_value = "base64", help = "Encoding of the given hashes: base64 or hex")]
        encoding: HashEncoding,
        #[arg(short = 'f', long = "files", help = "Read hashes from the given files, one per line")]
        from_files: bool,
        #[arg(required = true, help = "Hashes to look up, or hash files with -f")]
        hashes: Vec<String>,
        #[arg(long, num_args = 1.., required = true, help = "Index files to search")]
        index: Vec<PathBuf>,
    },
    #[command(
        about = "Render an ordinal as a string over a charset",
        after_help = r#"EXAMPLES
  $ distgen encode 42 -c 01
  $ distgen encode 123456789012345678901234567890"#
    )]
    Encode {
        #[arg(value_parser = parse_ordinal, help = "Non-negative integer")]
        ordinal: BigUint,
        #[command(flatten)]
        charset: CharsetArgs,
    },
    #[command(
        about = "Read a string over a charset back into its ordinal",
        after_help = r#"EXAMPLES
  $ distgen decode 101010 -c 01"#
    )]
    Decode {
        #[arg(help = "String made only of charset symbols")]
        value: String,
        #[command(flatten)]
        charset: CharsetArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts.

Prints a completion script for the given shell to stdout."#,
        after_help = r#"EXAMPLES
  $ distgen completion bash > ~/.local/share/bash-completion/completions/distgen
  $ distgen completion zsh > ~/.zfunc/_distgen
  $ distgen completion fish > ~/.config/fish/completions/distgen.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::Queue => err.with_hint("Queue unavailable. Check --queue-dir and retry."),
        ErrorKind::Sink => err.with_hint("Upload failed. Check the sink location and credentials."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

/// Arbitrary-precision ordinal as a bare JSON number.
fn ordinal_json(value: &BigUint) -> Value {
    value
        .to_string()
        .parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(value.to_string()))
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, is_tty));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::InvalidSymbol => "symbol outside charset".to_string(),
        ErrorKind::InvalidSeed => "invalid seed".to_string(),
        ErrorKind::SeedTooLong => "seed too long".to_string(),
        ErrorKind::InvalidBlockSize => "invalid block size".to_string(),
        ErrorKind::Data => "undecodable data".to_string(),
        ErrorKind::Queue => "queue error".to_string(),
        ErrorKind::Sink => "sink error".to_string(),
        ErrorKind::Interrupted => "interrupted".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(block) = err.block() {
        inner.insert(
            "block".to_string(),
            json!({ "start": ordinal_json(&block.start), "stop": ordinal_json(&block.stop) }),
        );
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", colorize_label("hint:", use_color, AnsiColor::Yellow)));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(block) = err.block() {
        lines.push(format!("{} {block}", colorize_label("block:", use_color, AnsiColor::Yellow)));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let subcommand = usage.and_then(|usage| {
        let mut tokens = usage.split_whitespace();
        tokens.find(|token| *token == "distgen")?;
        tokens.next().filter(|token| !token.starts_with(['-', '<', '[']))
    });
    match subcommand {
        Some(subcommand) => format!("Try `distgen {subcommand} --help`."),
        None => "Try `distgen --help`.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, ordinal_json, parse_ordinal};
    use clap::CommandFactory;
    use num_bigint::BigUint;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ordinals_parse_and_render_as_numbers() {
        let big = parse_ordinal("123456789012345678901234567890").unwrap();
        assert_eq!(ordinal_json(&big).to_string(), "123456789012345678901234567890");
        assert!(parse_ordinal("-1").is_err());
        assert_eq!(parse_ordinal(" 7 ").unwrap(), BigUint::from(7u32));
    }
}
