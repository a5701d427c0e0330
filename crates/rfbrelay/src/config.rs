use std::path::PathBuf;
use std::time::Duration;

use rfbrelay_core::{BridgeConfig, PlayerConfig, RecorderConfig, SessionStore, WsPeer};

use crate::cli::ServeArgs;
use crate::error::{Result, ServerError};

/// Default player invocation; the rfb file path is appended as last argument.
pub const DEFAULT_PLAYER_COMMAND: &str = "java -cp GuiPlayer.jar PlayerServer";

/// Runtime configuration for the relay server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub listen: String,
    /// Directory holding recorded sessions.
    pub session_dir: PathBuf,
    /// Directory holding files for the external player.
    pub rfb_dir: PathBuf,
    /// Record `/websockify` sessions.
    pub record: bool,
    /// Upstream of `/playback-rfb-dbg` when the path names none.
    pub debug_upstream: String,
    /// Program and leading arguments of the external player.
    pub player_command: Vec<String>,
    pub bridge: BridgeConfig,
    pub player: PlayerConfig,
    /// Cancellation check interval of WebSocket reads.
    pub peer_poll: Duration,
    /// Upper bound on a slow client's handshake.
    pub handshake_timeout: Duration,
    /// Max WebSocket message/frame size.
    pub max_message_bytes: usize,
    /// Optional JSONL session event log.
    pub telemetry_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8888".to_string(),
            session_dir: PathBuf::from("resources/sess"),
            rfb_dir: PathBuf::from("resources/rfb"),
            record: true,
            debug_upstream: "localhost:8889".to_string(),
            player_command: split_command(DEFAULT_PLAYER_COMMAND),
            bridge: BridgeConfig::default(),
            player: PlayerConfig::default(),
            peer_poll: WsPeer::DEFAULT_POLL,
            handshake_timeout: Duration::from_secs(10),
            max_message_bytes: 1 << 20,
            telemetry_path: None,
        }
    }
}

impl ServerConfig {
    pub fn from_args(args: &ServeArgs) -> Result<Self> {
        let player_command = split_command(&args.player_command);
        if player_command.is_empty() {
            return Err(ServerError::invalid("--player-command must name a program"));
        }
        if args.max_message_bytes == 0 {
            return Err(ServerError::invalid("--max-message-bytes must be > 0"));
        }
        let defaults = Self::default();
        Ok(Self {
            listen: args.listen.clone(),
            session_dir: args.session_dir.clone(),
            rfb_dir: args.rfb_dir.clone(),
            record: !args.no_record,
            debug_upstream: args.debug_upstream.clone(),
            player_command,
            bridge: BridgeConfig {
                read_buffer_bytes: args.max_message_bytes,
                dial_timeout: Duration::from_millis(args.dial_timeout_ms),
                recorder: RecorderConfig {
                    capacity: args.recorder_capacity,
                    overflow: args.recorder_overflow.into(),
                },
            },
            max_message_bytes: args.max_message_bytes,
            telemetry_path: args.telemetry.clone(),
            ..defaults
        })
    }

    #[must_use]
    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.session_dir)
    }

    #[must_use]
    pub fn rfb_store(&self) -> SessionStore {
        SessionStore::new(&self.rfb_dir)
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use rfbrelay_core::OverflowPolicy;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(argv).expect("parse");
        match cli.command {
            Commands::Serve(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_defaults_match_config_defaults() {
        let config = ServerConfig::from_args(&serve_args(&["rfbrelay", "serve"])).expect("config");
        let defaults = ServerConfig::default();
        assert_eq!(config.listen, defaults.listen);
        assert_eq!(config.session_dir, defaults.session_dir);
        assert_eq!(config.rfb_dir, defaults.rfb_dir);
        assert_eq!(config.record, defaults.record);
        assert_eq!(config.debug_upstream, defaults.debug_upstream);
        assert_eq!(config.player_command, vec!["java", "-cp", "GuiPlayer.jar", "PlayerServer"]);
        assert_eq!(config.bridge.read_buffer_bytes, defaults.bridge.read_buffer_bytes);
        assert_eq!(config.bridge.dial_timeout, defaults.bridge.dial_timeout);
        assert_eq!(config.bridge.recorder, RecorderConfig::default());
        assert_eq!(config.max_message_bytes, defaults.max_message_bytes);
        assert_eq!(config.telemetry_path, None);
    }

    #[test]
    fn overrides_flow_through() {
        let args = serve_args(&[
            "rfbrelay",
            "serve",
            "--listen",
            "127.0.0.1:0",
            "--no-record",
            "--recorder-capacity",
            "16",
            "--recorder-overflow",
            "drop",
            "--dial-timeout-ms",
            "250",
            "--player-command",
            "/usr/bin/player --fast",
            "--telemetry",
            "/tmp/events.jsonl",
        ]);
        let config = ServerConfig::from_args(&args).expect("config");
        assert_eq!(config.listen, "127.0.0.1:0");
        assert!(!config.record);
        assert_eq!(config.bridge.recorder.capacity, 16);
        assert_eq!(config.bridge.recorder.overflow, OverflowPolicy::Drop);
        assert_eq!(config.bridge.dial_timeout, Duration::from_millis(250));
        assert_eq!(config.player_command, vec!["/usr/bin/player", "--fast"]);
        assert_eq!(config.telemetry_path, Some(PathBuf::from("/tmp/events.jsonl")));
    }

    #[test]
    fn empty_player_command_is_rejected() {
        let args = serve_args(&["rfbrelay", "serve", "--player-command", "  "]);
        let error = ServerConfig::from_args(&args).expect_err("rejected");
        assert_eq!(error.exit_code(), 2);
    }
}
