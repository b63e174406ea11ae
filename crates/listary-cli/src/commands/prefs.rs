//! Preferences command handlers

use anyhow::{bail, Result};

use listary_core::{Placement, Store, Theme};

use super::resolve_list;
use crate::output::Output;

/// Show preferences
pub fn show(store: &Store, output: &Output) -> Result<()> {
    output.print_preferences(store.preferences(), store.default_list());
    Ok(())
}

/// Set one preference
pub async fn set(store: &mut Store, key: String, value: String, output: &Output) -> Result<()> {
    match key.as_str() {
        "theme" => {
            let theme: Theme = value.parse()?;
            store.preferences_mut().set_theme(theme).await;
        }
        "new_list_placement" => {
            let placement: Placement = value.parse()?;
            store.preferences_mut().set_new_list_placement(placement).await;
        }
        "new_item_placement" => {
            let placement: Placement = value.parse()?;
            store.preferences_mut().set_new_item_placement(placement).await;
        }
        "default_list" => {
            if value.is_empty() || value == "none" {
                store.set_default_list(None).await;
            } else {
                let id = resolve_list(store, &value)?.id.clone();
                store.set_default_list(Some(&id)).await;
            }
        }
        _ => {
            bail!(
                "Unknown preference: '{}'\n\
                 Valid keys: theme, new_list_placement, new_item_placement, default_list",
                key
            );
        }
    }

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}
