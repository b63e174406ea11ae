//! Status command handler

use anyhow::Result;

use listary_core::{Config, LocalStorage, PersistenceMode, Store};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &Store, config: &Config, output: &Output) -> Result<()> {
    let lists = store.lists();
    let items: usize = lists.iter().map(|list| list.items.len()).sum();
    let completed: usize = lists.iter().map(|list| list.completed_count()).sum();
    let default_list = store.default_list();

    let mode = match store.mode() {
        PersistenceMode::Local => "local",
        PersistenceMode::Remote => "remote",
    };
    // Local data left behind after signing in without migrating
    let pending_migration =
        store.mode() == PersistenceMode::Remote && LocalStorage::new(config.local_dir()).has_data();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "mode": mode,
                    "user_id": config.user_id,
                    "storage": {
                        "local_dir": config.local_dir(),
                        "remote_db": config.remote_db_path(),
                    },
                    "counts": {
                        "lists": lists.len(),
                        "items": items,
                        "completed": completed
                    },
                    "default_list_id": default_list.map(|list| list.id.as_str()),
                    "pending_migration": pending_migration
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", mode);
        }
        OutputFormat::Human => {
            println!("Listary Status");
            println!("==============");
            println!();
            println!("Storage:");
            println!("  Mode:     {}", mode);
            match store.mode() {
                PersistenceMode::Local => {
                    println!("  Location: {}", config.local_dir().display());
                }
                PersistenceMode::Remote => {
                    println!(
                        "  Account:  {}",
                        config.user_id.as_deref().unwrap_or("(unknown)")
                    );
                    println!("  Database: {}", config.remote_db_path().display());
                }
            }
            println!();
            println!("Contents:");
            println!("  Lists:    {}", lists.len());
            println!("  Items:    {} ({} done)", items, completed);
            println!(
                "  Default:  {}",
                default_list.map(|list| list.name.as_str()).unwrap_or("(none)")
            );
            if pending_migration {
                println!();
                println!("Local lists from before sign-in are still on this device.");
                println!(
                    "  Copy them with: listary login {} --migrate",
                    config.user_id.as_deref().unwrap_or("<user>")
                );
            }
        }
    }

    Ok(())
}
