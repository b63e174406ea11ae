//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use listary_core::{List, Preferences, PersistenceFailure};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print all lists with their completion counts
    pub fn print_lists(&self, lists: &[List], default_id: Option<&str>) {
        match self.format {
            OutputFormat::Human => {
                if lists.is_empty() {
                    println!("No lists yet.");
                    return;
                }
                for list in lists {
                    let marker = if default_id == Some(list.id.as_str()) {
                        " *"
                    } else {
                        ""
                    };
                    println!(
                        "{:>3}. {} | {}{} | {}/{} done",
                        list.order + 1,
                        short_id(&list.id),
                        truncate(&list.name, 35),
                        marker,
                        list.completed_count(),
                        list.items.len()
                    );
                }
                println!("\n{} list(s)", lists.len());
            }
            OutputFormat::Json => print_json(lists),
            OutputFormat::Quiet => {
                for list in lists {
                    println!("{}", list.id);
                }
            }
        }
    }

    /// Print one list and its items
    pub fn print_list(&self, list: &List) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "{} ({}/{} done)",
                    list.name,
                    list.completed_count(),
                    list.items.len()
                );
                println!("ID:    {}", list.id);
                println!("Color: {}", list.color);
                println!();

                if list.items.is_empty() {
                    println!("No items in this list.");
                    return;
                }
                for item in &list.items {
                    let check = if item.completed { "x" } else { " " };
                    println!("{:>3}. [{}] {}", item.order + 1, check, item.text);
                }
            }
            OutputFormat::Json => print_json(list),
            OutputFormat::Quiet => {
                for item in &list.items {
                    println!("{}", item.id);
                }
            }
        }
    }

    /// Print preferences; `default_list` is the list the default resolves to
    pub fn print_preferences(&self, preferences: &Preferences, default_list: Option<&List>) {
        match self.format {
            OutputFormat::Human => {
                println!("Preferences:");
                println!("  theme:              {}", preferences.theme);
                println!("  new_list_placement: {}", preferences.new_list_placement);
                println!("  new_item_placement: {}", preferences.new_item_placement);
                match (preferences.default_list_id.as_deref(), default_list) {
                    (Some(id), Some(list)) if list.id == id => {
                        println!("  default_list:       {}", list.name)
                    }
                    (_, Some(list)) => println!("  default_list:       {} (first list)", list.name),
                    (_, None) => println!("  default_list:       (none)"),
                }
            }
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "theme": preferences.theme.as_str(),
                    "new_list_placement": preferences.new_list_placement.as_str(),
                    "new_item_placement": preferences.new_item_placement.as_str(),
                    "default_list_id": preferences.default_list_id,
                    "resolved_default_list_id": default_list.map(|list| list.id.as_str()),
                });
                println!("{}", json);
            }
            OutputFormat::Quiet => {
                println!("{}", preferences.theme);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print the id of something just created
    pub fn created(&self, what: &str, id: &str, label: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ Added {}: {}", what, label),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "id": id, "name": label})
                );
            }
            OutputFormat::Quiet => println!("{}", id),
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Report writes that did not reach storage
    ///
    /// Always goes to stderr so scripts see it in every format.
    pub fn failures(&self, failures: &[PersistenceFailure]) {
        for line in failure_lines(failures) {
            eprintln!("{}", line);
        }
    }
}

/// One warning per failure, then each distinct recovery suggestion once
fn failure_lines(failures: &[PersistenceFailure]) -> Vec<String> {
    let mut lines: Vec<String> = failures
        .iter()
        .map(|failure| format!("Warning: {}", failure))
        .collect();

    let mut suggestions: Vec<&str> = Vec::new();
    for suggestion in failures
        .iter()
        .filter_map(|failure| failure.source.recovery_suggestion())
    {
        if !suggestions.contains(&suggestion) {
            suggestions.push(suggestion);
        }
    }
    lines.extend(suggestions.into_iter().map(|s| format!("  {}", s)));
    lines
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// First eight characters of an id
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
