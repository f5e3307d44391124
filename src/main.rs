use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use scenepilot::{
    config::{AppConfig, ProviderKind},
    heuristics::Heuristics,
    http::{self, AppState},
    markup::MarkupOptions,
    model::{MockModelProvider, ModelProvider, OpenRouterProvider},
    orchestrator::{ChatOrchestrator, TurnSettings},
    repl::Repl,
    session::SessionManager,
};
use tokio::{io::BufReader, net::TcpListener};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scenepilot")]
#[command(about = "Directed roleplay and chat against OpenRouter models")]
struct Cli {
    /// Session store file; overrides SCENEPILOT_STORE.
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive terminal session (default).
    Chat,
    /// Serve the HTTP API.
    Serve {
        /// Overrides HTTP_BIND / PORT.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    let heuristics = match &config.heuristics_path {
        Some(path) => {
            info!(path = %path.display(), "loading heuristics overrides");
            Heuristics::load(path)?
        }
        None => Heuristics::default(),
    };

    let orchestrator = ChatOrchestrator::new(
        build_model_provider(&config)?,
        heuristics,
        TurnSettings {
            temperature: config.temperature,
            retry_temperature: config.retry_temperature,
            max_tokens: config.max_tokens,
        },
        MarkupOptions {
            actions: config.parse_actions,
            whispers: config.parse_whispers,
        },
    );
    let mut sessions = SessionManager::open(&config.store_path, config.default_mode)?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            Repl::new(&orchestrator, &mut sessions)
                .run(stdin, &mut stdout)
                .await?;
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(config.http_bind);
            let app = http::router(AppState::new(orchestrator, sessions));
            let listener = TcpListener::bind(bind).await?;
            info!("ScenePilot HTTP API listening on {bind}");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn build_model_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.model_provider {
        ProviderKind::OpenRouter => {
            info!(model = %config.openrouter_model, "using OpenRouter model provider");
            Ok(Arc::new(OpenRouterProvider::new(
                config.openrouter_base_url.clone(),
                config.openrouter_api_key.clone(),
                config.openrouter_model.clone(),
                config.openrouter_referer.clone(),
                config.openrouter_title.clone(),
                config.request_timeout,
            )?))
        }
        ProviderKind::Mock => {
            warn!("MODEL_PROVIDER=mock; replies are canned and nothing leaves this machine");
            Ok(Arc::new(MockModelProvider))
        }
    }
}
