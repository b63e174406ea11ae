//! Listary CLI
//!
//! Command-line interface for Listary - personal lists and checklists.

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use listary_core::{Config, SqliteBackend, Store};

mod commands;
mod output;

use commands::account::MigrationChoice;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "listary")]
#[command(about = "Listary - Personal lists and checklists")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show all lists
    #[command(alias = "ls")]
    Lists,
    /// Manage lists
    List {
        #[command(subcommand)]
        command: ListCommands,
    },
    /// Show the items of a list (default list if omitted)
    Items {
        /// List name, ID or ID prefix
        list: Option<String>,
    },
    /// Manage items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Show or set preferences
    Prefs {
        #[command(subcommand)]
        command: Option<PrefsCommands>,
    },
    /// Sign in; lists on this device can be copied into the account
    Login {
        /// Account to sign in as
        user: String,
        /// Copy local lists into the account without asking
        #[arg(long, conflicts_with = "skip")]
        migrate: bool,
        /// Discard local lists without asking
        #[arg(long, conflicts_with = "migrate")]
        skip: bool,
    },
    /// Sign out and go back to lists on this device
    Logout,
    /// Follow changes from other devices
    Watch,
    /// Show status (storage mode, account, counts)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Create a new list
    #[command(alias = "create")]
    Add {
        /// List name
        name: String,
    },
    /// Delete lists and their items
    #[command(alias = "delete")]
    Rm {
        /// List names, IDs or ID prefixes
        #[arg(required = true)]
        lists: Vec<String>,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Rename a list
    Rename {
        /// List name, ID or ID prefix
        list: String,
        /// New name
        name: String,
    },
    /// Change the color of a list
    Color {
        /// List name, ID or ID prefix
        list: String,
        /// Color token, e.g. "#4ECDC4"
        color: String,
    },
    /// Move a list to a position (1 = first)
    #[command(alias = "pos")]
    Position {
        /// List name, ID or ID prefix
        list: String,
        /// New position
        position: usize,
    },
    /// Put lists in the given order
    Reorder {
        /// Lists in their new order; unnamed lists follow
        #[arg(required = true)]
        lists: Vec<String>,
    },
    /// Show, set or clear the default list
    Default {
        /// List name, ID or ID prefix
        #[arg(conflicts_with = "clear")]
        list: Option<String>,
        /// Clear the default list
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add items
    #[command(alias = "create")]
    Add {
        /// Item texts
        #[arg(required = true)]
        texts: Vec<String>,
        /// List name, ID or ID prefix (default list if omitted)
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Delete items
    #[command(alias = "delete")]
    Rm {
        /// Items by position, ID or text
        #[arg(required = true)]
        items: Vec<String>,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Check or uncheck an item
    Toggle {
        /// Item by position, ID or text
        item: String,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Change the text of an item
    Edit {
        /// Item by position, ID or text
        item: String,
        /// New text
        text: String,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Mark items done
    Done {
        /// Items by position, ID or text
        items: Vec<String>,
        /// Every item of the list
        #[arg(short, long, conflicts_with = "items")]
        all: bool,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Mark items not done
    Undone {
        /// Items by position, ID or text
        items: Vec<String>,
        /// Every item of the list
        #[arg(short, long, conflicts_with = "items")]
        all: bool,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Move an item to a position (1 = first)
    #[command(alias = "pos")]
    Position {
        /// Item by position, ID or text
        item: String,
        /// New position
        position: usize,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Put items in the given order
    Reorder {
        /// Items in their new order; unnamed items follow
        #[arg(required = true)]
        items: Vec<String>,
        #[arg(short, long)]
        list: Option<String>,
    },
    /// Delete every completed item of a list
    Clear {
        /// List name, ID or ID prefix (default list if omitted)
        list: Option<String>,
    },
    /// Move items to another list
    Mv {
        /// Items by position, ID or text
        #[arg(required = true)]
        items: Vec<String>,
        /// Target list
        #[arg(short, long)]
        to: String,
        /// Source list (default list if omitted)
        #[arg(short, long)]
        list: Option<String>,
    },
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Show preferences
    Show,
    /// Set a preference
    Set {
        /// Preference (theme, new_list_placement, new_item_placement, default_list)
        key: String,
        /// Value
        value: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_db, user_id, refetch_debounce_ms, log_file)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let command = account_command(cli.command);

    // Commands that don't need the store
    if let Some(Commands::Config { command }) = &command {
        return handle_config_command(command.clone(), &output);
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    init_logging(&config);

    match command {
        Some(Commands::Login {
            user,
            migrate,
            skip,
        }) => {
            let choice = if migrate {
                MigrationChoice::Migrate
            } else if skip {
                MigrationChoice::Skip
            } else {
                MigrationChoice::Ask
            };
            commands::account::login(&mut config, user, choice, &output).await
        }
        Some(Commands::Logout) => commands::account::logout(&mut config, &output),
        Some(Commands::Watch) => {
            let (store, backend) = open_store(&config).await?;
            commands::watch::watch(store, backend, &config, &output).await
        }
        command => {
            let (mut store, _backend) = open_store(&config).await?;
            let result = handle_store_command(command, &mut store, &config, &output).await;
            report_failures(&mut store, &output);
            result
        }
    }
}

/// Setting `user_id` signs in or out, so local lists are offered for migration
fn account_command(command: Option<Commands>) -> Option<Commands> {
    match command {
        Some(Commands::Config {
            command: Some(ConfigCommands::Set { key, value }),
        }) if key == "user_id" => {
            if value.trim().is_empty() || value == "none" {
                Some(Commands::Logout)
            } else {
                Some(Commands::Login {
                    user: value,
                    migrate: false,
                    skip: false,
                })
            }
        }
        command => command,
    }
}

/// Open the remote store when signed in, the device store otherwise
async fn open_store(config: &Config) -> Result<(Store, Option<Arc<SqliteBackend>>)> {
    match config.user_id {
        Some(ref user_id) => {
            if let Some(warning) = commands::account::unmigrated_warning(config) {
                eprintln!("Warning: {}", warning);
            }
            let backend = Arc::new(
                SqliteBackend::open(&config.remote_db_path())
                    .context("Failed to open remote store")?,
            );
            let store = Store::open_remote(backend.clone(), user_id.clone())
                .await
                .context("Failed to load lists")?;
            Ok((store, Some(backend)))
        }
        None => {
            let store = Store::open_local(config)
                .await
                .context("Failed to load lists")?;
            Ok((store, None))
        }
    }
}

async fn handle_store_command(
    command: Option<Commands>,
    store: &mut Store,
    config: &Config,
    output: &Output,
) -> Result<()> {
    match command {
        Some(Commands::Lists) | None => commands::list::list_all(store, output),
        Some(Commands::List { command }) => handle_list_command(command, store, output).await,
        Some(Commands::Items { list }) => commands::list::show(store, list, output),
        Some(Commands::Item { command }) => handle_item_command(command, store, output).await,
        Some(Commands::Prefs { command }) => match command {
            Some(PrefsCommands::Show) | None => commands::prefs::show(store, output),
            Some(PrefsCommands::Set { key, value }) => {
                commands::prefs::set(store, key, value, output).await
            }
        },
        Some(Commands::Status) => commands::status::show(store, config, output),
        Some(
            Commands::Login { .. } | Commands::Logout | Commands::Watch | Commands::Config { .. },
        ) => unreachable!(), // Handled in main
    }
}

async fn handle_list_command(
    command: ListCommands,
    store: &mut Store,
    output: &Output,
) -> Result<()> {
    match command {
        ListCommands::Add { name } => commands::list::create(store, name, output).await,
        ListCommands::Rm { lists, yes } => commands::list::delete(store, lists, yes, output).await,
        ListCommands::Rename { list, name } => {
            commands::list::rename(store, list, name, output).await
        }
        ListCommands::Color { list, color } => {
            commands::list::color(store, list, color, output).await
        }
        ListCommands::Position { list, position } => {
            commands::list::move_to(store, list, position, output).await
        }
        ListCommands::Reorder { lists } => commands::list::reorder(store, lists, output).await,
        ListCommands::Default { list, clear } => {
            commands::list::set_default(store, list, clear, output).await
        }
    }
}

async fn handle_item_command(
    command: ItemCommands,
    store: &mut Store,
    output: &Output,
) -> Result<()> {
    match command {
        ItemCommands::Add { texts, list } => commands::item::add(store, list, texts, output).await,
        ItemCommands::Rm { items, list } => {
            commands::item::delete(store, list, items, output).await
        }
        ItemCommands::Toggle { item, list } => {
            commands::item::toggle(store, list, item, output).await
        }
        ItemCommands::Edit { item, text, list } => {
            commands::item::edit(store, list, item, text, output).await
        }
        ItemCommands::Done { items, all, list } => {
            commands::item::set_completed(store, list, items, all, true, output).await
        }
        ItemCommands::Undone { items, all, list } => {
            commands::item::set_completed(store, list, items, all, false, output).await
        }
        ItemCommands::Position {
            item,
            position,
            list,
        } => commands::item::move_to(store, list, item, position, output).await,
        ItemCommands::Reorder { items, list } => {
            commands::item::reorder(store, list, items, output).await
        }
        ItemCommands::Clear { list } => commands::item::clear(store, list, output).await,
        ItemCommands::Mv { items, to, list } => {
            commands::item::transfer(store, list, to, items, output).await
        }
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

/// Writes that failed after the change was applied in memory
fn report_failures(store: &mut Store, output: &Output) {
    let failures = store.take_failures();
    if !failures.is_empty() {
        output.failures(&failures);
    }
}

/// Initialize logging
///
/// Level comes from LISTARY_LOG (default: warn). Logs go to stderr, or to
/// `log_file` when configured.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env("LISTARY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match config.log_file {
        Some(ref path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                builder.with_writer(std::io::stderr).try_init()
            }
        },
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if let Err(e) = result {
        eprintln!("Warning: Could not initialize logging: {}", e);
    }
}
