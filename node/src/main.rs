// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # websign
//!
//! Entry point for the `websign` binary. Parses CLI arguments, initializes
//! logging, and dispatches:
//!
//! - `relay`   : run the signaling relay (plus Prometheus metrics)
//! - `identity`: list, create, import, rename, delete, export identities
//! - `sign`    : sign a challenge offline, print the credential
//! - `verify`  : verify a credential from stdin
//! - `pair`    : answer a browser session as its second device
//! - `turn`    : configure the TURN server used for peer links

mod cli;
mod identities;
mod logging;
mod metrics;
mod pair;
mod relay;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use websign_protocol::auth::{sign, verify_credential, AuthMessage, VerifyOptions};
use websign_protocol::signaling::WebRtcConnector;

use cli::{Commands, WebSignCli};
use logging::DEFAULT_DIRECTIVE;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WebSignCli::parse();
    logging::init_logging(DEFAULT_DIRECTIVE, cli.log_format);

    match cli.command {
        Commands::Relay(args) => relay::run(args).await,
        Commands::Identity(command) => {
            let store = identities::open_store(identities::open_storage(&cli.data_dir)?)?;
            identities::run(command, &store).await
        }
        Commands::Turn(command) => {
            let storage = identities::open_storage(&cli.data_dir)?;
            identities::run_turn(command, storage.as_ref())
        }
        Commands::Sign(args) => sign_challenge(&cli.data_dir, args),
        Commands::Verify(args) => verify_stdin(args),
        Commands::Pair(args) => run_pair(&cli.data_dir, args).await,
    }
}

/// Signs one challenge with a stored identity and prints the credential.
fn sign_challenge(data_dir: &std::path::Path, args: cli::SignArgs) -> Result<()> {
    let store = identities::open_store(identities::open_storage(data_dir)?)?;
    let identity = identities::resolve(&store, &args.identity)?;
    let signed = sign(&identity, &args.challenge, &args.origin).context("signing failed")?;
    tracing::info!(identity = %identity.id, origin = %args.origin, "challenge signed");
    println!("{}", signed.to_credential().to_json());
    Ok(())
}

/// Reads a credential JSON from stdin, verifies it, and prints who signed it.
fn verify_stdin(args: cli::VerifyArgs) -> Result<()> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read credential from stdin")?;
    let Some(AuthMessage::Credential(credential)) = AuthMessage::parse(raw.trim()) else {
        anyhow::bail!("stdin does not hold a public-key credential");
    };

    let options = VerifyOptions {
        expected_origin: args.origin,
        max_age: Duration::from_secs(args.max_age_secs),
        ..VerifyOptions::default()
    };
    let verified =
        verify_credential(&credential, &args.challenge, &options).context("verification failed")?;
    println!(
        "{}",
        serde_json::json!({
            "id": verified.id.to_string(),
            "name": verified.name,
            "origin": verified.client_data.origin,
            "timestamp": verified.client_data.timestamp,
        })
    );
    Ok(())
}

/// Pairs with a browser session over WebRTC.
async fn run_pair(data_dir: &std::path::Path, args: cli::PairArgs) -> Result<()> {
    let storage = identities::open_storage(data_dir)?;
    let store = identities::open_store(storage.clone())?;
    let identity = identities::resolve(&store, &args.identity)?;
    let config = pair::session_config(&args, storage.as_ref())?;
    let connector = Arc::new(WebRtcConnector::new());

    let signed = if args.yes {
        pair::pair(&args.channel, identity, &config, connector, pair::AlwaysYes).await?
    } else {
        pair::pair(&args.channel, identity, &config, connector, pair::Prompt).await?
    };
    eprintln!("Signed in as {}.", signed.identity_id);
    Ok(())
}
