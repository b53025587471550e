mod admin_commands;
mod hub_commands;
mod relay_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "hubrelay", about = "hubrelay: hub events to a local consumer", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./hubrelay.{toml,yaml,yml,json}, then ~/.config/hubrelay/).
    #[arg(long, global = true, env = "HUBRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every configured org and relay events (default).
    Run,
    /// Send a message through the hub.
    Send {
        /// Org label. Required with several orgs unless the target has an `org:<label>|` prefix.
        #[arg(long)]
        org: Option<String>,
        /// `<name>`, `thread:<id>`, optionally prefixed with `org:<label>|`.
        target: String,
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Query the hub (peers, threads, messages, catch-up). Prints JSON.
    Hub {
        /// Org label. Required when several orgs are configured.
        #[arg(long, global = true)]
        org: Option<String>,
        #[command(subcommand)]
        action: hub_commands::HubAction,
    },
    /// Inspect or change an org's access policy.
    Admin {
        /// Org label. Required when several orgs are configured.
        #[arg(long, global = true)]
        org: Option<String>,
        #[command(subcommand)]
        action: admin_commands::AdminAction,
    },
}

/// Logs go to stderr so `send` and `admin` output stays clean on stdout.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = cli.config.as_deref();
    match cli.command {
        None | Some(Commands::Run) => relay_commands::run(config).await,
        Some(Commands::Send {
            org,
            target,
            message,
        }) => relay_commands::send(config, org.as_deref(), &target, &message.join(" ")).await,
        Some(Commands::Hub { org, action }) => {
            hub_commands::handle_hub(config, org.as_deref(), action).await
        },
        Some(Commands::Admin { org, action }) => {
            admin_commands::handle_admin(config, org.as_deref(), action)
        },
    }
}
