//! Sign-in and sign-out handlers
//!
//! Signing in switches the CLI to the remote store and offers to copy any
//! lists kept on this device into the account.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use listary_core::{
    Config, LocalStorage, MigrationCoordinator, MigrationReport, MigrationState, SqliteBackend,
};

use super::confirm;
use crate::output::{Output, OutputFormat};

/// What to do with local lists found at sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationChoice {
    /// Copy them into the account
    Migrate,
    /// Discard them
    Skip,
    /// Ask, or leave them for later when not interactive
    Ask,
}

/// Sign in and resolve a pending migration
pub async fn login(
    config: &mut Config,
    user_id: String,
    choice: MigrationChoice,
    output: &Output,
) -> Result<()> {
    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        bail!("User cannot be empty");
    }

    let backend = Arc::new(
        SqliteBackend::open(&config.remote_db_path()).context("Failed to open remote store")?,
    );

    config.user_id = Some(user_id.clone());
    config.save().context("Failed to save configuration")?;
    info!("Signed in as {}", user_id);
    output.success(&format!("Signed in as {}", user_id));

    let mut coordinator = MigrationCoordinator::new(LocalStorage::new(config.local_dir()), backend);
    if !coordinator.on_authenticated(&user_id) {
        return Ok(());
    }

    let choice = match choice {
        MigrationChoice::Ask if output.should_prompt() => {
            if confirm("Lists from this device were found. Copy them into your account?")? {
                MigrationChoice::Migrate
            } else if confirm("Discard them instead?")? {
                MigrationChoice::Skip
            } else {
                MigrationChoice::Ask
            }
        }
        choice => choice,
    };

    match choice {
        MigrationChoice::Migrate => {
            let progress = log_progress(coordinator.watch());
            let result = coordinator.confirm().await;
            coordinator.acknowledge();
            drop(coordinator);
            // Ends once the coordinator is dropped
            let _ = progress.await;

            let report = result.with_context(|| {
                format!(
                    "Migration failed; local lists were kept. Run `listary login {} --migrate` to retry",
                    user_id
                )
            })?;
            print_report(&report, output);
        }
        MigrationChoice::Skip => {
            coordinator.skip()?;
            output.success("Discarded local lists");
        }
        MigrationChoice::Ask => {
            output.message(&format!(
                "Local lists were left on this device. Run `listary login {} --migrate` to copy them.",
                user_id
            ));
        }
    }

    Ok(())
}

/// Sign out and return to local storage
pub fn logout(config: &mut Config, output: &Output) -> Result<()> {
    let Some(user_id) = config.user_id.take() else {
        output.message("Not signed in.");
        return Ok(());
    };

    config.save().context("Failed to save configuration")?;
    info!("Signed out {}", user_id);
    output.success(&format!("Signed out {}", user_id));
    Ok(())
}

/// Log migration state changes until the coordinator goes away
fn log_progress(mut states: watch::Receiver<MigrationState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().name();
            info!("Migration {}", state);
        }
    })
}

/// Warning for lists left on the device while signed in
///
/// Signing in through `LISTARY_USER` skips the migration check, as does an
/// undecided prompt.
pub fn unmigrated_warning(config: &Config) -> Option<String> {
    let user_id = config.user_id.as_deref()?;
    if !LocalStorage::new(config.local_dir()).has_data() {
        return None;
    }
    Some(format!(
        "lists on this device were not copied into {0}. Run `listary login {0} --migrate` to copy them.",
        user_id
    ))
}

fn print_report(report: &MigrationReport, output: &Output) {
    match output.format {
        OutputFormat::Json => {
            let lists: Vec<_> = report
                .id_map
                .iter()
                .map(|(local, remote)| serde_json::json!({"local_id": local, "remote_id": remote}))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "status": "success",
                    "lists": report.lists,
                    "items": report.items,
                    "preferences_migrated": report.preferences_migrated,
                    "id_map": lists
                })
            );
        }
        _ => output.success(&format!(
            "Copied {} list(s) and {} item(s) into your account",
            report.lists, report.items
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listary_core::Store;
    use tempfile::TempDir;

    struct EnvGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &std::path::Path) -> Self {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, original }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[tokio::test]
    async fn test_unmigrated_warning() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let mut local = Store::open_local(&config).await.unwrap();
        local.add_list("Shopping").await.unwrap();
        drop(local);
        assert!(unmigrated_warning(&config).is_none());

        config.user_id = Some("alice".to_string());
        let warning = unmigrated_warning(&config).unwrap();
        assert!(warning.contains("listary login alice --migrate"));

        LocalStorage::new(config.local_dir()).clear().unwrap();
        assert!(unmigrated_warning(&config).is_none());
    }

    // Single test so the LISTARY_CONFIG override cannot race another test
    #[tokio::test]
    async fn test_login_migrates_then_logout() {
        let dir = TempDir::new().unwrap();
        let _guard = EnvGuard::set("LISTARY_CONFIG", &dir.path().join("config.toml"));
        let output = Output::new(OutputFormat::Quiet);

        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let mut local = Store::open_local(&config).await.unwrap();
        let shopping = local.add_list("Shopping").await.unwrap();
        local.add_items(&shopping, &["Milk", "Bread"]).await;
        drop(local);

        login(&mut config, "alice".into(), MigrationChoice::Migrate, &output)
            .await
            .unwrap();
        assert_eq!(config.user_id.as_deref(), Some("alice"));
        assert!(!LocalStorage::new(config.local_dir()).has_data());

        let backend = Arc::new(SqliteBackend::open(&config.remote_db_path()).unwrap());
        let remote = Store::open_remote(backend, "alice").await.unwrap();
        assert_eq!(remote.lists().len(), 1);
        let texts: Vec<&str> = remote.lists()[0]
            .items
            .iter()
            .map(|item| item.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Milk", "Bread"]);

        // Nothing left to migrate on the next sign-in
        login(&mut config, "alice".into(), MigrationChoice::Ask, &output)
            .await
            .unwrap();

        logout(&mut config, &output).unwrap();
        assert!(config.user_id.is_none());
        assert!(Config::load().unwrap().user_id.is_none());
    }
}
