//! List command handlers

use anyhow::{bail, Result};

use listary_core::{ListUpdate, Store};

use super::{confirm, resolve_list, resolve_list_or_default};
use crate::output::{Output, OutputFormat};

/// Show all lists
pub fn list_all(store: &Store, output: &Output) -> Result<()> {
    let default_id = store.default_list().map(|list| list.id.as_str());
    output.print_lists(store.lists(), default_id);
    Ok(())
}

/// Show the items of a list (the default list when none is given)
pub fn show(store: &Store, list: Option<String>, output: &Output) -> Result<()> {
    let list = resolve_list_or_default(store, list.as_deref())?;
    output.print_list(list);
    Ok(())
}

/// Create a list
pub async fn create(store: &mut Store, name: String, output: &Output) -> Result<()> {
    let id = store.add_list(&name).await?;
    let name = store.list(&id).map(|list| list.name.clone()).unwrap_or(name);
    output.created("list", &id, &name);
    Ok(())
}

/// Delete one or more lists with their items
pub async fn delete(store: &mut Store, lists: Vec<String>, yes: bool, output: &Output) -> Result<()> {
    let mut ids = Vec::new();
    let mut names = Vec::new();
    let mut item_count = 0;
    for query in &lists {
        let list = resolve_list(store, query)?;
        if !ids.contains(&list.id) {
            ids.push(list.id.clone());
            names.push(list.name.clone());
            item_count += list.items.len();
        }
    }

    if !yes && output.should_prompt() {
        println!(
            "Delete {} with {} item(s)",
            names.join(", "),
            item_count
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete_lists(&ids).await;
    output.success(&format!("Deleted {}", names.join(", ")));
    Ok(())
}

/// Rename a list
pub async fn rename(store: &mut Store, list: String, name: String, output: &Output) -> Result<()> {
    let id = resolve_list(store, &list)?.id.clone();
    store.update_list(&id, ListUpdate::new().name(name)).await?;

    if let Some(list) = store.list(&id) {
        output.success(&format!("Renamed list to {}", list.name));
    }
    Ok(())
}

/// Change the color of a list
pub async fn color(store: &mut Store, list: String, color: String, output: &Output) -> Result<()> {
    let color = color.trim().to_string();
    if color.is_empty() {
        bail!("Color cannot be empty");
    }

    let list = resolve_list(store, &list)?;
    let (id, name) = (list.id.clone(), list.name.clone());
    store.update_list(&id, ListUpdate::new().color(color.clone())).await?;

    output.success(&format!("Set color of {} to {}", name, color));
    Ok(())
}

/// Move a list to a 1-based position
pub async fn move_to(store: &mut Store, list: String, position: usize, output: &Output) -> Result<()> {
    if position == 0 {
        bail!("Positions start at 1");
    }

    let list = resolve_list(store, &list)?;
    let (id, name) = (list.id.clone(), list.name.clone());
    store
        .update_list(&id, ListUpdate::new().order(position as i64 - 1))
        .await?;

    let rank = store.list(&id).map(|list| list.order + 1).unwrap_or(0);
    output.success(&format!("Moved {} to position {}", name, rank));
    Ok(())
}

/// Put lists in the given order; unnamed lists follow
pub async fn reorder(store: &mut Store, lists: Vec<String>, output: &Output) -> Result<()> {
    let ids = lists
        .iter()
        .map(|query| resolve_list(store, query).map(|list| list.id.clone()))
        .collect::<Result<Vec<_>>>()?;

    store.reorder_lists(&ids).await;

    let default_id = store.default_list().map(|list| list.id.as_str());
    output.print_lists(store.lists(), default_id);
    Ok(())
}

/// Set or clear the default list, or show it
pub async fn set_default(
    store: &mut Store,
    list: Option<String>,
    clear: bool,
    output: &Output,
) -> Result<()> {
    if clear {
        store.set_default_list(None).await;
        output.success("Cleared default list");
        return Ok(());
    }

    match list {
        Some(query) => {
            let list = resolve_list(store, &query)?;
            let (id, name) = (list.id.clone(), list.name.clone());
            store.set_default_list(Some(&id)).await;
            output.success(&format!("Default list is now {}", name));
        }
        None => match store.default_list() {
            Some(list) => match output.format {
                OutputFormat::Quiet => println!("{}", list.id),
                _ => output.message(&format!("Default list: {}", list.name)),
            },
            None => output.message("No lists yet."),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use listary_core::Config;
    use tempfile::TempDir;

    async fn local_store(dir: &TempDir) -> Store {
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        Store::open_local(&config).await.unwrap()
    }

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    fn names(store: &Store) -> Vec<&str> {
        store.lists().iter().map(|list| list.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_rename_and_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = local_store(&dir).await;

        create(&mut store, "  Shopping ".to_string(), &quiet()).await.unwrap();
        create(&mut store, "Work".to_string(), &quiet()).await.unwrap();
        assert_eq!(names(&store), vec!["Shopping", "Work"]);

        rename(&mut store, "work".to_string(), "Office".to_string(), &quiet())
            .await
            .unwrap();
        assert_eq!(names(&store), vec!["Shopping", "Office"]);

        delete(&mut store, vec!["Shopping".to_string()], true, &quiet())
            .await
            .unwrap();
        assert_eq!(names(&store), vec!["Office"]);
        assert_eq!(store.lists()[0].order, 0);
    }

    #[tokio::test]
    async fn test_blank_name_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut store = local_store(&dir).await;

        assert!(create(&mut store, "   ".to_string(), &quiet()).await.is_err());
        assert!(store.lists().is_empty());
    }

    #[tokio::test]
    async fn test_move_and_reorder() {
        let dir = TempDir::new().unwrap();
        let mut store = local_store(&dir).await;
        for name in ["A", "B", "C"] {
            create(&mut store, name.to_string(), &quiet()).await.unwrap();
        }

        move_to(&mut store, "C".to_string(), 1, &quiet()).await.unwrap();
        assert_eq!(names(&store), vec!["C", "A", "B"]);

        reorder(&mut store, vec!["B".to_string()], &quiet()).await.unwrap();
        assert_eq!(names(&store), vec!["B", "C", "A"]);

        assert!(move_to(&mut store, "A".to_string(), 0, &quiet()).await.is_err());
    }

    #[tokio::test]
    async fn test_default_list() {
        let dir = TempDir::new().unwrap();
        let mut store = local_store(&dir).await;
        create(&mut store, "Shopping".to_string(), &quiet()).await.unwrap();
        create(&mut store, "Work".to_string(), &quiet()).await.unwrap();

        set_default(&mut store, Some("Work".to_string()), false, &quiet())
            .await
            .unwrap();
        assert_eq!(store.default_list().unwrap().name, "Work");

        set_default(&mut store, None, true, &quiet()).await.unwrap();
        assert_eq!(store.default_list().unwrap().name, "Shopping");
    }
}
