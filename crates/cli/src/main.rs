use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "f8-relay")]
#[command(about = "F8 Slack relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay (webhook endpoints + direct ask API).
    Serve {
        /// Config file path (default: F8_RELAY_CONFIG_PATH or ~/.f8relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 14141)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Ask a question against a running relay's direct API (test harness).
    Ask {
        /// The question to route.
        question: String,

        /// Base URL of the running relay.
        #[arg(long, default_value = "http://127.0.0.1:14141")]
        url: String,

        /// Requester id to report (context only).
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("f8-relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("relay failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { question, url, user }) => {
            if let Err(e) = run_ask(question, url, user).await {
                log::error!("ask failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.relay.port = p;
    }
    log::info!("starting relay on {}:{}", config.relay.bind, config.relay.port);
    lib::gateway::run_relay(config).await
}

async fn run_ask(question: String, url: String, user: String) -> anyhow::Result<()> {
    let endpoint = format!("{}/api/slack/ask-f8", url.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let res = client
        .post(&endpoint)
        .json(&serde_json::json!({ "question": question, "user": user }))
        .send()
        .await?;
    let status = res.status();
    let body: serde_json::Value = res.json().await?;
    if !status.is_success() {
        anyhow::bail!("relay returned {}: {}", status, body);
    }
    let answered = body.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    let message = body.get("message").and_then(|v| v.as_str()).unwrap_or("");
    if let Some(agent) = body.get("agent").and_then(|v| v.as_str()) {
        println!("[{}] {}", agent, message);
    } else {
        println!("{}", message);
    }
    if !answered {
        std::process::exit(1);
    }
    Ok(())
}
