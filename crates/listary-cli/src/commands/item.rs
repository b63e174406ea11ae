//! Item command handlers
//!
//! Every handler works on one list, named with `--list` or defaulting to
//! the default list. Items are referenced by position, id or text.

use anyhow::{bail, Result};

use listary_core::{ItemUpdate, Store};

use super::{resolve_item, resolve_items, resolve_list, resolve_list_or_default};
use crate::output::{Output, OutputFormat};

/// Add one or more items
pub async fn add(
    store: &mut Store,
    list: Option<String>,
    texts: Vec<String>,
    output: &Output,
) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let (list_id, list_name) = (list.id.clone(), list.name.clone());

    if let [text] = texts.as_slice() {
        if let Some(id) = store.add_item(&list_id, text).await? {
            output.created("item", &id, text.trim());
        }
        return Ok(());
    }

    let ids = store.add_items(&list_id, &texts).await;
    if ids.is_empty() {
        bail!("Item text cannot be empty");
    }

    match output.format {
        OutputFormat::Quiet => {
            for id in &ids {
                println!("{}", id);
            }
        }
        _ => output.success(&format!("Added {} item(s) to {}", ids.len(), list_name)),
    }
    Ok(())
}

/// Delete items
pub async fn delete(
    store: &mut Store,
    list: Option<String>,
    items: Vec<String>,
    output: &Output,
) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let ids = resolve_items(list, &items)?;

    store.delete_items(&ids).await;
    output.success(&format!("Deleted {} item(s)", ids.len()));
    Ok(())
}

/// Flip the completed flag of an item
pub async fn toggle(
    store: &mut Store,
    list: Option<String>,
    item: String,
    output: &Output,
) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let list_id = list.id.clone();
    let item_id = resolve_item(list, &item)?.id.clone();

    store.toggle_item(&list_id, &item_id).await;

    if let Some((_, item)) = store.item(&item_id) {
        let state = if item.completed { "done" } else { "not done" };
        output.success(&format!("{} is {}", item.text, state));
    }
    Ok(())
}

/// Change the text of an item
pub async fn edit(
    store: &mut Store,
    list: Option<String>,
    item: String,
    text: String,
    output: &Output,
) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let item_id = resolve_item(list, &item)?.id.clone();

    store.update_item(&item_id, ItemUpdate::new().text(text)).await?;

    if let Some((_, item)) = store.item(&item_id) {
        output.success(&format!("Updated item: {}", item.text));
    }
    Ok(())
}

/// Mark items done or not done; `all` targets every item of the list
pub async fn set_completed(
    store: &mut Store,
    list: Option<String>,
    items: Vec<String>,
    all: bool,
    completed: bool,
    output: &Output,
) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let ids = if all {
        list.items.iter().map(|item| item.id.clone()).collect()
    } else if items.is_empty() {
        bail!("Name the items to update, or pass --all");
    } else {
        resolve_items(list, &items)?
    };

    store
        .update_items(&ids, ItemUpdate::new().completed(completed))
        .await?;

    let state = if completed { "done" } else { "not done" };
    output.success(&format!("Marked {} item(s) {}", ids.len(), state));
    Ok(())
}

/// Delete every completed item of a list
pub async fn clear(store: &mut Store, list: Option<String>, output: &Output) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let name = list.name.clone();
    let ids: Vec<String> = list
        .items
        .iter()
        .filter(|item| item.completed)
        .map(|item| item.id.clone())
        .collect();

    if ids.is_empty() {
        output.message(&format!("No completed items in {}.", name));
        return Ok(());
    }

    store.delete_items(&ids).await;
    output.success(&format!("Cleared {} completed item(s) from {}", ids.len(), name));
    Ok(())
}

/// Move an item to a 1-based position in its list
pub async fn move_to(
    store: &mut Store,
    list: Option<String>,
    item: String,
    position: usize,
    output: &Output,
) -> Result<()> {
    if position == 0 {
        bail!("Positions start at 1");
    }

    let list = resolve_list_or_default(store, list.as_deref())?;
    let item_id = resolve_item(list, &item)?.id.clone();

    store
        .update_item(&item_id, ItemUpdate::new().order(position as i64 - 1))
        .await?;

    if let Some((_, item)) = store.item(&item_id) {
        output.success(&format!("Moved {} to position {}", item.text, item.order + 1));
    }
    Ok(())
}

/// Put items in the given order; unnamed items follow
pub async fn reorder(
    store: &mut Store,
    list: Option<String>,
    items: Vec<String>,
    output: &Output,
) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    let list_id = list.id.clone();
    let ids = resolve_items(list, &items)?;

    store.reorder_items(&list_id, &ids).await;

    if let Some(list) = store.list(&list_id) {
        output.print_list(list);
    }
    Ok(())
}

/// Move items to another list
pub async fn transfer(
    store: &mut Store,
    list: Option<String>,
    to: String,
    items: Vec<String>,
    output: &Output,
) -> Result<()> {
    let source = resolve_list_or_default(store, list.as_deref())?;
    let from_id = source.id.clone();
    let ids = resolve_items(source, &items)?;

    let target = resolve_list(store, &to)?;
    let (to_id, to_name) = (target.id.clone(), target.name.clone());
    if to_id == from_id {
        bail!("Items are already in {}", to_name);
    }

    let moved = store.move_items(&from_id, &to_id, &ids).await;
    match output.format {
        OutputFormat::Quiet => {
            for (_, new_id) in &moved {
                println!("{}", new_id);
            }
        }
        _ => output.success(&format!("Moved {} item(s) to {}", moved.len(), to_name)),
    }
    Ok(())
}
