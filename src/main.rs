//! Main module for the dbai CLI application.
//!
//! Handles command parsing, configuration loading and initialization, then
//! invokes the library for the requested command.
//!
//! # Examples
//!
//! ```sh
//! dbai init
//! DB_NAME=shop dbai discover
//! dbai ask "How many orders were placed last week?"
//! dbai ask -c 3 "And the week before?"
//! dbai serve --bind 0.0.0.0:3000
//! ```

use std::{error::Error, fs, path::Path, sync::Arc};

use clap::Parser;
use dbai::{
    commands::{Cli, Commands, ConversationCommand},
    config::{self, DbaiConfig},
    conversations::ConversationStore,
    llm::OpenAiModel,
    server::{self, AppState},
    snapshot::SnapshotStore,
    source::SqlxSource,
    template,
    tools::QueryRecord,
};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

const SESSION_POOL_SIZE: u32 = 4;

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Loads configuration, parses command-line arguments and executes the command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    let load_config = || load(&config_path);

    match cli.command {
        Commands::Init => init(&config_path)?,
        Commands::Discover => {
            let config = load_config()?;
            let state = app_state(&config)?;
            let rows = state.discovery.discover().await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            info!("Snapshot written to {}", config.snapshot_path);
        }
        Commands::Describe => {
            let config = load_config()?;
            let state = app_state(&config)?;
            let rows = state.descriptions.generate_descriptions().await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Snapshot => {
            let config = load_config()?;
            let rows = SnapshotStore::new(&config.snapshot_path).load()?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Suggest => {
            let config = load_config()?;
            let state = app_state(&config)?;
            for (index, suggestion) in state.suggestions.suggest().await?.iter().enumerate() {
                println!("{}. {}", index + 1, suggestion);
            }
        }
        Commands::Ask {
            question,
            conversation,
        } => {
            let config = load_config()?;
            let state = app_state(&config)?;
            ask(&state, conversation, &question).await?;
        }
        Commands::Conversations { action } => {
            let config = load_config()?;
            let store = ConversationStore::open(&config.session_db_url, SESSION_POOL_SIZE)?;
            conversations(&store, action)?;
        }
        Commands::Serve { bind } => {
            let config = load_config()?;
            let state = Arc::new(app_state(&config)?);
            let address = bind.unwrap_or_else(|| config.bind_address.clone());
            server::serve(state, &address).await?;
        }
    }

    Ok(())
}

fn load(config_path: &Path) -> Result<DbaiConfig, Box<dyn Error>> {
    let mut config = if config_path.exists() {
        config::load_config(&config_path.to_string_lossy())?
    } else {
        warn!(
            "No config at {}; using defaults (run `dbai init` to create one)",
            config_path.display()
        );
        DbaiConfig::default()
    };
    config.apply_env();
    debug!("Config loaded for model {} at {}", config.model, config.api_base);
    Ok(config)
}

fn app_state(config: &DbaiConfig) -> Result<AppState, Box<dyn Error>> {
    let store = ConversationStore::open(&config.session_db_url, SESSION_POOL_SIZE)?;
    let source = SqlxSource::connect_lazy(&config.source)?;
    let template = template::resolve_template(config)?;

    Ok(AppState::new(
        store,
        Arc::new(OpenAiModel::new(config)),
        Arc::new(source),
        SnapshotStore::new(&config.snapshot_path),
        template,
        config,
    ))
}

async fn ask(
    state: &AppState,
    conversation: Option<i32>,
    question: &str,
) -> Result<(), Box<dyn Error>> {
    let conversation = match conversation {
        Some(id) => state.store.get_conversation(id)?,
        None => {
            let title: String = question.chars().take(60).collect();
            state.store.create_conversation(&title)?
        }
    };
    let history: Vec<_> = state
        .store
        .conversation_messages(conversation.id)?
        .into_iter()
        .map(|entry| entry.message)
        .collect();

    let outcome = state
        .assistant
        .run_turn_with_timeout(state.turn_timeout, conversation.id, question, &history)
        .await?;

    for query in &outcome.queries {
        match query {
            QueryRecord::Recorded(query) => debug!("Executed: {}", query.content),
            QueryRecord::Dropped { content } => warn!("Executed but not recorded: {}", content),
        }
    }
    println!("{}", outcome.reply);
    info!("Conversation {}", conversation.id);
    Ok(())
}

fn conversations(
    store: &ConversationStore,
    action: ConversationCommand,
) -> Result<(), Box<dyn Error>> {
    match action {
        ConversationCommand::New { title } => {
            let convo = store.create_conversation(title.as_deref().unwrap_or("New conversation"))?;
            println!("{}\t{}", convo.id, convo.title);
        }
        ConversationCommand::List => {
            for convo in store.list_conversations()? {
                println!("{}\t{}\t{}", convo.id, convo.updated_at, convo.title);
            }
        }
        ConversationCommand::Rename { id, title } => {
            let convo = store.rename_conversation(id, &title)?;
            println!("{}\t{}", convo.id, convo.title);
        }
        ConversationCommand::Delete { id } => {
            store.delete_conversation(id)?;
            println!("Deleted conversation {id}");
        }
        ConversationCommand::Show { id } => {
            let convo = store.get_conversation(id)?;
            println!("# {}", convo.title);
            for entry in store.conversation_messages(id)? {
                println!("\n[{}] {}", entry.message.role, entry.message.content);
                for query in entry.queries {
                    println!("  > {}", query.content);
                }
            }
        }
    }
    Ok(())
}

/// Writes a default configuration file.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created, or if a
/// configuration already exists at `config_path`.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()).into());
    }
    if let Some(parent) = config_path.parent() {
        info!("Creating config directory: {}", parent.display());
        fs::create_dir_all(parent)?;
    }

    info!("Creating config file: {}", config_path.display());
    let config_yaml = serde_yaml::to_string(&DbaiConfig::default())?;
    fs::write(config_path, config_yaml)?;
    println!("Wrote {}", config_path.display());

    Ok(())
}
