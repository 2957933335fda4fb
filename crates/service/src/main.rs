use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use service::http::api::client::ApiClient;
use service::http::api::v0::RecipientsRequest;
use service::process::spawn_service;
use service::Config;

#[derive(Parser, Debug)]
#[command(name = "keyrelay")]
#[command(about = "End-to-end encrypted key relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve(Serve),
    /// Look up the registered devices of one or more users on a running relay
    Recipients(Recipients),
}

#[derive(Args, Debug, Clone)]
struct Serve {
    /// Address for the API server to listen on
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen_addr: SocketAddr,

    /// SQLite database path (process-local memory backends if not set)
    #[arg(long)]
    sqlite_path: Option<PathBuf>,

    /// Maximum number of devices per user
    #[arg(long, default_value_t = common::directory::DEFAULT_MAX_DEVICES_PER_USER)]
    max_devices_per_user: usize,

    /// Handshake session lifetime, in seconds
    #[arg(long, default_value_t = 300)]
    handshake_ttl_secs: u64,

    /// Longest lifetime a pairing ticket may request, in seconds
    #[arg(long, default_value_t = 600)]
    pairing_ttl_max_secs: u64,

    /// Interval between expired session purges, in seconds
    #[arg(long, default_value_t = 60)]
    purge_interval_secs: u64,

    /// Bearer credential the auth adapter must present to complete handshakes
    #[arg(long)]
    completion_token: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

impl From<Serve> for Config {
    fn from(args: Serve) -> Self {
        Config {
            listen_addr: args.listen_addr,
            sqlite_path: args.sqlite_path,
            max_devices_per_user: args.max_devices_per_user,
            handshake_ttl: Duration::from_secs(args.handshake_ttl_secs),
            pairing_ttl_max: Duration::from_secs(args.pairing_ttl_max_secs),
            purge_interval: Duration::from_secs(args.purge_interval_secs),
            completion_token: args.completion_token,
            log_level: args.log_level,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct Recipients {
    #[arg(long, default_value = "http://localhost:3000")]
    remote: Url,

    /// User id sent in the x-user-id header
    #[arg(long)]
    as_user: String,

    /// Users to resolve
    #[arg(required = true)]
    user_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(serve) => {
            let config = Config::from(serve);
            spawn_service(&config).await?;
        }
        Command::Recipients(lookup) => {
            let client = ApiClient::new(&lookup.remote, &lookup.as_user)?;
            let response = client
                .call(RecipientsRequest {
                    user_ids: lookup.user_ids,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
