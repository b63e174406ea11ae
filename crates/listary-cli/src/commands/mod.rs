//! Command handlers

pub mod account;
pub mod config;
pub mod item;
pub mod list;
pub mod prefs;
pub mod status;
pub mod watch;

use anyhow::{bail, Result};

use listary_core::{Item, List, Store};

/// Find a list by id, name or id prefix
///
/// Names match case-insensitively.
pub fn resolve_list<'a>(store: &'a Store, query: &str) -> Result<&'a List> {
    if let Some(list) = store.list(query) {
        return Ok(list);
    }

    let by_name: Vec<&List> = store
        .lists()
        .iter()
        .filter(|list| list.name.eq_ignore_ascii_case(query.trim()))
        .collect();
    match by_name.len() {
        0 => {}
        1 => return Ok(by_name[0]),
        _ => {
            eprintln!("Multiple lists are named '{}':", query);
            for list in &by_name {
                eprintln!("  {}", list.id);
            }
            bail!("Ambiguous list name. Use the list ID instead.");
        }
    }

    let by_prefix: Vec<&List> = store
        .lists()
        .iter()
        .filter(|list| list.id.starts_with(query))
        .collect();
    match by_prefix.len() {
        0 => bail!("No list found matching: {}", query),
        1 => Ok(by_prefix[0]),
        _ => {
            eprintln!("Multiple lists match '{}':", query);
            for list in &by_prefix {
                eprintln!("  {} - {}", list.id, list.name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// The named list, or the default list when no name is given
pub fn resolve_list_or_default<'a>(store: &'a Store, query: Option<&str>) -> Result<&'a List> {
    match query {
        Some(query) => resolve_list(store, query),
        None => match store.default_list() {
            Some(list) => Ok(list),
            None => bail!("No lists yet. Create one with `listary list add <name>`."),
        },
    }
}

/// Find an item of a list by id, 1-based position or text
pub fn resolve_item<'a>(list: &'a List, query: &str) -> Result<&'a Item> {
    if let Some(item) = list.item(query) {
        return Ok(item);
    }

    if let Ok(position) = query.parse::<usize>() {
        return match position.checked_sub(1).and_then(|index| list.items.get(index)) {
            Some(item) => Ok(item),
            None => bail!(
                "No item at position {} in '{}' ({} item(s))",
                position,
                list.name,
                list.items.len()
            ),
        };
    }

    let matches: Vec<&Item> = list
        .items
        .iter()
        .filter(|item| item.text.eq_ignore_ascii_case(query.trim()))
        .collect();
    match matches.len() {
        0 => bail!("No item found matching '{}' in '{}'", query, list.name),
        1 => Ok(matches[0]),
        _ => bail!(
            "{} items in '{}' read '{}'. Use the position instead.",
            matches.len(),
            list.name,
            query
        ),
    }
}

/// Resolve several item references to ids
pub fn resolve_items<S: AsRef<str>>(list: &List, queries: &[S]) -> Result<Vec<String>> {
    queries
        .iter()
        .map(|query| resolve_item(list, query.as_ref()).map(|item| item.id.clone()))
        .collect()
}

/// Ask a yes/no question on the terminal
pub fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();

    Ok(input == "y" || input == "yes")
}
