use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rfbrelay_core::{OverflowPolicy, SessionStore};

use crate::config::{DEFAULT_PLAYER_COMMAND, ServerConfig};
use crate::error::Result;
use crate::logging;
use crate::server::Server;

#[derive(Debug, Parser)]
#[command(
    name = "rfbrelay",
    about = "WebSocket gateway for VNC servers with session recording and replay",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Accept WebSocket clients and relay, record, or replay sessions.
    Serve(ServeArgs),

    /// Summarize a recorded session file.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverflowArg {
    Block,
    Drop,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(arg: OverflowArg) -> Self {
        match arg {
            OverflowArg::Block => Self::Block,
            OverflowArg::Drop => Self::Drop,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8888")]
    pub listen: String,

    #[arg(long = "session-dir", default_value = "resources/sess")]
    pub session_dir: PathBuf,

    #[arg(long = "rfb-dir", default_value = "resources/rfb")]
    pub rfb_dir: PathBuf,

    /// Relay /websockify sessions without recording them.
    #[arg(long = "no-record")]
    pub no_record: bool,

    #[arg(long = "debug-upstream", default_value = "localhost:8889")]
    pub debug_upstream: String,

    #[arg(long = "player-command", default_value = DEFAULT_PLAYER_COMMAND)]
    pub player_command: String,

    #[arg(long = "dial-timeout-ms", default_value_t = 10_000)]
    pub dial_timeout_ms: u64,

    #[arg(long = "max-message-bytes", default_value_t = 1 << 20)]
    pub max_message_bytes: usize,

    /// Chunks queued for the recorder before the overflow policy applies.
    #[arg(long = "recorder-capacity", default_value_t = 0)]
    pub recorder_capacity: usize,

    #[arg(long = "recorder-overflow", value_enum, default_value_t = OverflowArg::Block)]
    pub recorder_overflow: OverflowArg,

    /// Append session events to this JSONL file.
    #[arg(long)]
    pub telemetry: Option<PathBuf>,

    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    #[arg(long = "log-json")]
    pub log_json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    pub id: String,

    #[arg(long = "session-dir", default_value = "resources/sess")]
    pub session_dir: PathBuf,

    #[arg(long)]
    pub json: bool,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve(&args),
        Commands::Inspect(args) => run_inspect(&args, &mut std::io::stdout().lock()),
    }
}

fn run_serve(args: &ServeArgs) -> Result<()> {
    logging::init(args.log_level.as_deref(), args.log_json)?;
    let config = ServerConfig::from_args(args)?;
    let server = Server::bind(config)?;
    server.serve()
}

pub fn run_inspect(args: &InspectArgs, out: &mut dyn Write) -> Result<()> {
    let stats = SessionStore::new(&args.session_dir).inspect(&args.id)?;
    if args.json {
        serde_json::to_writer_pretty(&mut *out, &stats)?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "session:  {}", args.id)?;
    writeln!(out, "packets:  {}", stats.packets)?;
    writeln!(out, "bytes:    {}", stats.payload_bytes)?;
    writeln!(
        out,
        "duration: {:.3}s",
        stats.duration_nanos() as f64 / 1_000_000_000.0
    )?;
    match &stats.corruption {
        None => writeln!(out, "end:      clean")?,
        Some(reason) => writeln!(out, "end:      truncated ({reason})")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use pretty_assertions::assert_eq;
    use rfbrelay_core::codec::{PacketHeader, write_packet};
    use rfbrelay_core::RelayError;
    use tempfile::tempdir;

    fn inspect_args(dir: &std::path::Path, id: &str, json: bool) -> InspectArgs {
        InspectArgs {
            id: id.to_string(),
            session_dir: dir.to_path_buf(),
            json,
        }
    }

    #[test]
    fn inspect_prints_summary() {
        let dir = tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let mut file = store.create("s1").expect("create");
        write_packet(&mut file, &PacketHeader::data(0, 4), b"AAAA").expect("write");
        write_packet(&mut file, &PacketHeader::data(150_000_000, 2), b"BB").expect("write");
        drop(file);

        let mut out = Vec::new();
        run_inspect(&inspect_args(dir.path(), "s1", false), &mut out).expect("inspect");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "session:  s1\npackets:  2\nbytes:    6\nduration: 0.150s\nend:      clean\n"
        );

        let mut out = Vec::new();
        run_inspect(&inspect_args(dir.path(), "s1", true), &mut out).expect("inspect json");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["packets"], 2);
        assert_eq!(value["corruption"], serde_json::Value::Null);
    }

    #[test]
    fn inspect_rejects_traversal() {
        let dir = tempdir().expect("tempdir");
        let mut out = Vec::new();
        let error = run_inspect(&inspect_args(dir.path(), "../etc", false), &mut out)
            .expect_err("rejected");
        assert!(matches!(
            error,
            ServerError::Relay(RelayError::InvalidSessionId { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn parses_inspect_subcommand() {
        let cli = Cli::try_parse_from(["rfbrelay", "inspect", "abc", "--json"]).expect("parse");
        match cli.command {
            Commands::Inspect(args) => {
                assert_eq!(args.id, "abc");
                assert!(args.json);
                assert_eq!(args.session_dir, PathBuf::from("resources/sess"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
