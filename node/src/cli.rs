//! # CLI Interface
//!
//! Command-line structure for `websign`, via `clap` derive. Every flag that
//! makes sense in a deployment also reads a `WEBSIGN_*` variable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use websign_protocol::config::{
    DEFAULT_METRICS_PORT, DEFAULT_RELAY_PORT, DEFAULT_SIGNAL_ENDPOINT, MAX_CLIENT_DATA_AGE,
    SESSION_TIMEOUT,
};

use crate::logging::LogFormat;

/// WebSign: passwordless sign-in with keys you hold.
///
/// Runs the signaling relay, manages the identities in a local store,
/// signs and verifies challenges offline, and pairs as a second device
/// with a browser session.
#[derive(Parser, Debug)]
#[command(name = "websign", version, propagate_version = true)]
pub struct WebSignCli {
    /// Directory holding the identity store.
    #[arg(long, short = 'd', global = true, env = "WEBSIGN_DATA_DIR", default_value = ".websign")]
    pub data_dir: PathBuf,

    /// Log output format.
    #[arg(long, global = true, env = "WEBSIGN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the signaling relay.
    Relay(RelayArgs),
    /// Manage stored identities.
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Sign a challenge and print the credential JSON.
    Sign(SignArgs),
    /// Verify a credential read from stdin.
    Verify(VerifyArgs),
    /// Act as the second device for a browser session.
    Pair(PairArgs),
    /// Show or change the TURN server used for peer links.
    #[command(subcommand)]
    Turn(TurnCommand),
}

/// Arguments for `relay`.
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to bind both listeners to.
    #[arg(long, env = "WEBSIGN_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the WebSocket relay (`/signal`) and `/health`.
    #[arg(long, env = "WEBSIGN_RELAY_PORT", default_value_t = DEFAULT_RELAY_PORT)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "WEBSIGN_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,
}

#[derive(Subcommand, Debug)]
pub enum IdentityCommand {
    /// List identities.
    List,
    /// Generate a new identity.
    Create {
        /// Display name.
        #[arg(long)]
        name: Option<String>,
        /// Vanity prefix for the fingerprint (1 to 3 base-58 characters).
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Import a base64 private key or an exported identity JSON.
    Import {
        /// The key or JSON. Use `-` to read it from stdin.
        key: String,
    },
    /// Rename an identity. Omit the name to clear it.
    Rename { id: String, name: Option<String> },
    /// Delete an identity. There is no undo.
    Delete { id: String },
    /// Print an identity, private key included, as JSON.
    Export { id: String },
}

/// Arguments for `sign`.
#[derive(Args, Debug)]
pub struct SignArgs {
    /// Fingerprint (or unique fingerprint prefix) of the identity to use.
    #[arg(long, short = 'i')]
    pub identity: String,

    /// Challenge issued by the relying party.
    #[arg(long, short = 'c')]
    pub challenge: String,

    /// Origin of the relying party, e.g. `https://shop.example`.
    #[arg(long, short = 'o')]
    pub origin: String,
}

/// Arguments for `verify`.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// The challenge that was issued.
    #[arg(long, short = 'c')]
    pub challenge: String,

    /// Require this origin in the signed client data.
    #[arg(long, short = 'o')]
    pub origin: Option<String>,

    /// Oldest client data to accept, in seconds.
    #[arg(long, default_value_t = MAX_CLIENT_DATA_AGE.as_secs())]
    pub max_age_secs: u64,
}

/// Arguments for `pair`.
#[derive(Args, Debug)]
pub struct PairArgs {
    /// Channel id shown by the browser session.
    #[arg(long)]
    pub channel: String,

    /// Fingerprint (or unique prefix) of the identity to sign with.
    #[arg(long, short = 'i')]
    pub identity: String,

    /// Signaling relay WebSocket URL.
    #[arg(long, env = "WEBSIGN_RELAY", default_value = DEFAULT_SIGNAL_ENDPOINT)]
    pub relay: String,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = SESSION_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Sign without asking for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum TurnCommand {
    /// Print the configured TURN server, if any.
    Show,
    /// Use a TURN server in addition to the default STUN servers.
    Set {
        url: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "WEBSIGN_TURN_PASSWORD")]
        password: String,
    },
    /// Go back to STUN only.
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        WebSignCli::command().debug_assert();
    }

    #[test]
    fn nested_identity_commands_parse() {
        let cli = WebSignCli::parse_from([
            "websign",
            "--data-dir",
            "/tmp/ws",
            "identity",
            "create",
            "--name",
            "alice",
            "--prefix",
            "ab",
        ]);
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/ws"));
        match cli.command {
            Commands::Identity(IdentityCommand::Create { name, prefix }) => {
                assert_eq!(name.as_deref(), Some("alice"));
                assert_eq!(prefix.as_deref(), Some("ab"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pair_defaults() {
        let cli = WebSignCli::parse_from([
            "websign", "pair", "--channel", "abc", "-i", "3x", "--log-format", "json",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Pair(args) = cli.command else {
            panic!("expected pair");
        };
        assert_eq!(args.relay, DEFAULT_SIGNAL_ENDPOINT);
        assert_eq!(args.timeout_secs, SESSION_TIMEOUT.as_secs());
        assert!(!args.yes);
    }
}
