//! Blocklink relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Default algorithms, fresh RSA key per connection
//! blocklink-server --bind 0.0.0.0:5321
//!
//! # Reuse one RSA key across restarts, offer only AES-256
//! blocklink-server --key-file server.pem --symmetric AES-256
//!
//! # Plaintext frames (local testing only)
//! blocklink-server --unencrypted
//! ```

use std::{path::PathBuf, sync::Arc};

use blocklink_crypto::{KeyExchangeAlgorithm, KeyLifetime, SymmetricAlgorithm};
use blocklink_proto::{CborSerializer, Message};
use blocklink_server::{
    DEFAULT_PORT, LinkConfig, MessageServer, Relay, ServerConfig, ServerError, SharedSerializer,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Blocklink relay server
#[derive(Parser, Debug)]
#[command(name = "blocklink-server")]
#[command(about = "Encrypted TCP message relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    bind: String,

    /// RSA private key (PKCS#1 PEM), created on first use
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    /// Offer only the identity algorithms (no encryption)
    #[arg(long, conflicts_with_all = ["key_file", "key_exchange", "symmetric"])]
    unencrypted: bool,

    /// Key-exchange algorithm to offer, e.g. RSA-2048 (repeatable)
    #[arg(long, value_name = "ALGORITHM")]
    key_exchange: Vec<String>,

    /// Symmetric algorithm to offer, e.g. AES-256 (repeatable)
    #[arg(long, value_name = "ALGORITHM")]
    symmetric: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let link = link_config(&args)?;
    if args.unencrypted {
        tracing::warn!("Encryption disabled - frames travel in plaintext");
    }

    let config = ServerConfig { bind: args.bind.clone(), ..ServerConfig::default() };
    let serializer: SharedSerializer<Message> = Arc::new(CborSerializer);
    let server = MessageServer::new(Arc::new(link), serializer, config.clone());
    let relay = Relay::install(&server);

    let local_addr = server.start(&config.bind).await?;
    tracing::info!(%local_addr, "Blocklink relay running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    relay.remove().await;
    server.stop().await;

    Ok(())
}

fn link_config(args: &Args) -> Result<LinkConfig, ServerError> {
    if args.unencrypted {
        return Ok(LinkConfig::unencrypted());
    }

    let mut link = LinkConfig::default();
    if !args.key_exchange.is_empty() {
        link.key_exchange =
            parse_algorithms(&args.key_exchange, KeyExchangeAlgorithm::from_identifier)?
                .into_iter()
                .collect();
    }
    if !args.symmetric.is_empty() {
        link.symmetric = parse_algorithms(&args.symmetric, SymmetricAlgorithm::from_identifier)?
            .into_iter()
            .collect();
    }
    if let Some(path) = &args.key_file {
        link = link.with_key_lifetime(KeyLifetime::Persisted(path.clone()));
    }

    Ok(link)
}

fn parse_algorithms<A>(
    identifiers: &[String],
    parse: impl Fn(&str) -> Option<A>,
) -> Result<Vec<A>, ServerError> {
    identifiers
        .iter()
        .map(|id| parse(id).ok_or_else(|| ServerError::Config(format!("unknown algorithm {id}"))))
        .collect()
}
