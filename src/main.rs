//! pg-chat - chat with a PostgreSQL database through an LLM.

mod cli;
mod repl;

use std::sync::Arc;

use cli::{AskArgs, Cli, Command, ConfigArgs, ServeArgs};
use pg_chat::config::Config;
use pg_chat::error::Result;
use pg_chat::llm::ProviderClientFactory;
use pg_chat::logging::{self, LogTarget};
use pg_chat::mcp::StdioToolConnector;
use pg_chat::orchestrator::Orchestrator;
use pg_chat::server;
use pg_chat::session::{
    ChatSession, ChatTransport, HttpTransport, HttpTransportConfig, InProcessTransport,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    logging::init(match &cli.command {
        Command::Ask(_) => LogTarget::default_file(),
        Command::Serve(_) | Command::Config(_) => LogTarget::Stderr,
    });

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        eprintln!("{}", e.message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Serve(args) => serve(&cli, args).await,
        Command::Ask(args) => ask(&cli, args).await,
        Command::Config(args) => configure(&cli, args),
    }
}

fn load_config(cli: &Cli, overrides: Option<&ServeArgs>) -> Result<Config> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    if let Some(args) = overrides {
        args.apply_to(&mut config)?;
    }
    Ok(config)
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let llm = ProviderClientFactory::from_config(&config.llm)?;
    info!(provider = %llm.provider().as_str(), model = %llm.model(), "LLM configured");
    let tools = StdioToolConnector::from_config(&config.mcp);
    Ok(Orchestrator::new(
        Arc::new(llm),
        Arc::new(tools),
        config.limits.clone(),
    ))
}

async fn serve(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let config = load_config(cli, Some(args))?;
    let orchestrator = build_orchestrator(&config)?;
    server::serve(&config.server.bind, orchestrator).await
}

async fn ask(cli: &Cli, args: &AskArgs) -> Result<()> {
    let settings = cli.settings_store().load()?;

    let transport: Arc<dyn ChatTransport> = if args.local {
        let config = load_config(cli, None)?;
        let orchestrator = build_orchestrator(&config)?;
        Arc::new(InProcessTransport::new(Arc::new(orchestrator)))
    } else {
        info!(server = %args.server, "Using chat server");
        Arc::new(HttpTransport::new(HttpTransportConfig::new(&args.server))?)
    };

    let mut session = ChatSession::new(transport, settings);
    match &args.message {
        Some(message) => repl::ask_once(&mut session, message).await,
        None => repl::run(&mut session).await,
    }
}

fn configure(cli: &Cli, args: &ConfigArgs) -> Result<()> {
    let store = cli.settings_store();
    let mut settings = store.load()?;

    if args.has_changes() {
        args.apply_to(&mut settings)?;
        store.save(&settings)?;
        println!("Saved settings to {}", store.path().display());
    }

    if args.show || !args.has_changes() {
        println!("{}", settings.display_summary());
    }

    Ok(())
}
