//! Data models for Listary
//!
//! Defines the core data structures: List, Item and Preferences, plus the
//! typed partial-update requests used by the store.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a list
pub type ListId = String;

/// Identifier of an item (unique across all lists)
pub type ItemId = String;

/// Colors assigned to new lists
pub const PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#95E1D3", "#FFD93D", "#6BCF7F", "#A78BFA", "#FFA07A", "#87CEEB",
];

/// Color used when the palette yields nothing
pub const FALLBACK_COLOR: &str = "#FF6B6B";

/// Length of the random suffix in generated item ids
const ITEM_ID_SUFFIX_LEN: usize = 7;

/// Pick a random color from the palette
pub fn random_color() -> String {
    PALETTE
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_COLOR)
        .to_string()
}

/// Generate a new item id scoped to the given list
///
/// Format: `{list_id}-{unix_millis}-{7 lowercase alphanumerics}`.
pub fn generate_item_id(list_id: &str) -> ItemId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ITEM_ID_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("{}-{}-{}", list_id, Utc::now().timestamp_millis(), suffix)
}

/// Generate a new list id
pub fn generate_list_id() -> ListId {
    Uuid::new_v4().to_string()
}

/// A single checkable entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    /// Unique identifier
    pub id: ItemId,
    /// Item text
    pub text: String,
    /// Whether the item is checked off
    #[serde(default)]
    pub completed: bool,
    /// Rank among the items of the owning list
    pub order: i64,
}

impl Item {
    /// Create a new, incomplete item for the given list
    pub fn new(list_id: &str, text: impl Into<String>) -> Self {
        Self::with_id(generate_item_id(list_id), text)
    }

    /// Create an item with a specific ID (for loading from storage)
    pub fn with_id(id: impl Into<ItemId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            completed: false,
            order: 0,
        }
    }

    /// Merge the text and completed fields of an update
    ///
    /// `order` is positional and handled by the store.
    pub fn apply(&mut self, update: &ItemUpdate) {
        if let Some(ref text) = update.text {
            self.text = text.clone();
        }
        if let Some(completed) = update.completed {
            self.completed = completed;
        }
    }
}

/// A named, ordered collection of items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct List {
    /// Unique identifier
    pub id: ListId,
    /// Display name
    pub name: String,
    /// Palette color token
    pub color: String,
    /// Rank among all lists
    pub order: i64,
    /// Items, kept sorted by rank
    #[serde(default)]
    pub items: Vec<Item>,
}

impl List {
    /// Create a new empty list with a random palette color
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(generate_list_id(), name)
    }

    /// Create a list with a specific ID (for loading from storage)
    pub fn with_id(id: impl Into<ListId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: random_color(),
            order: 0,
            items: Vec::new(),
        }
    }

    /// Look up an item by id
    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Check whether the list holds an item
    pub fn contains_item(&self, id: &str) -> bool {
        self.item(id).is_some()
    }

    /// Number of completed items
    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.completed).count()
    }

    /// Merge the name and color fields of an update
    ///
    /// `order` is positional and handled by the store.
    pub fn apply(&mut self, update: &ListUpdate) {
        if let Some(ref name) = update.name {
            self.name = name.clone();
        }
        if let Some(ref color) = update.color {
            self.color = color.clone();
        }
    }
}

/// Partial update of a list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub order: Option<i64>,
}

impl ListUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.order.is_none()
    }
}

/// Partial update of an item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub order: Option<i64>,
}

impl ItemUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.completed.is_none() && self.order.is_none()
    }
}

/// Error returned when parsing a preference value from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind} value: '{value}'")]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

/// Color theme
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            _ => Err(ParseValueError {
                kind: "theme",
                value: s.to_string(),
            }),
        }
    }
}

/// Where new entries land among their siblings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Top,
    #[default]
    Bottom,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Top => "top",
            Placement::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Placement {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Placement::Top),
            "bottom" => Ok(Placement::Bottom),
            _ => Err(ParseValueError {
                kind: "placement",
                value: s.to_string(),
            }),
        }
    }
}

/// Per-account (or per-device) preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    /// List opened by default; may be stale
    #[serde(default)]
    pub default_list_id: Option<ListId>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub new_list_placement: Placement,
    #[serde(default)]
    pub new_item_placement: Placement,
}

impl Preferences {
    /// Merge an update into these preferences
    pub fn apply(&mut self, update: &PreferencesUpdate) {
        if let Some(ref default_list_id) = update.default_list_id {
            self.default_list_id = default_list_id.clone();
        }
        if let Some(theme) = update.theme {
            self.theme = theme;
        }
        if let Some(placement) = update.new_list_placement {
            self.new_list_placement = placement;
        }
        if let Some(placement) = update.new_item_placement {
            self.new_item_placement = placement;
        }
    }
}

/// Partial update of preferences
///
/// `default_list_id` is doubly optional: `Some(None)` clears the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesUpdate {
    pub default_list_id: Option<Option<ListId>>,
    pub theme: Option<Theme>,
    pub new_list_placement: Option<Placement>,
    pub new_item_placement: Option<Placement>,
}

impl PreferencesUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_list_id(mut self, id: Option<ListId>) -> Self {
        self.default_list_id = Some(id);
        self
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn new_list_placement(mut self, placement: Placement) -> Self {
        self.new_list_placement = Some(placement);
        self
    }

    pub fn new_item_placement(mut self, placement: Placement) -> Self {
        self.new_item_placement = Some(placement);
        self
    }

    /// Update that rewrites every field to match `prefs`
    pub fn full(prefs: &Preferences) -> Self {
        Self {
            default_list_id: Some(prefs.default_list_id.clone()),
            theme: Some(prefs.theme),
            new_list_placement: Some(prefs.new_list_placement),
            new_item_placement: Some(prefs.new_item_placement),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.default_list_id.is_none()
            && self.theme.is_none()
            && self.new_list_placement.is_none()
            && self.new_item_placement.is_none()
    }
}

/// Trim user-supplied text, rejecting blank input
pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
