use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};

use crate::config::deserialize_lenient_int;
use crate::error::{Result, TocError};
use crate::numbering::{convert, CounterStyle};

/// Where an entry points.
///
/// Accepts `5`, `[5, 0.1, 0.9]` (page plus x/y fractions of the page box) or a URI string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryTarget {
    Page(u32),
    Position(u32, f32, f32),
    Uri(String),
}

impl EntryTarget {
    /// Logical page number, `None` for external links.
    pub fn page(&self) -> Option<u32> {
        match self {
            EntryTarget::Page(page) | EntryTarget::Position(page, _, _) => Some(*page),
            EntryTarget::Uri(_) => None,
        }
    }
}

/// One table-of-contents row and its sub-entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryNode {
    #[serde(default = "short_id")]
    pub id: String,
    pub title: String,
    #[serde(rename = "to")]
    pub target: EntryTarget,
    #[serde(default)]
    pub children: Vec<EntryNode>,
    #[serde(default = "default_open")]
    pub open: bool,
}

fn default_open() -> bool {
    true
}

impl EntryNode {
    pub fn new(title: impl Into<String>, page: u32) -> Self {
        EntryNode {
            id: short_id(),
            title: title.into(),
            target: EntryTarget::Page(page),
            children: Vec::new(),
            open: true,
        }
    }

    pub fn with_children(mut self, children: Vec<EntryNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }
}

/// A leveled row as produced by ToC extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatEntry {
    pub title: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default, deserialize_with = "deserialize_lenient_int")]
    pub page: Option<i64>,
}

fn default_level() -> u32 {
    1
}

impl FlatEntry {
    pub fn new(title: impl Into<String>, level: u32, page: i64) -> Self {
        FlatEntry {
            title: title.into(),
            level,
            page: Some(page),
        }
    }
}

/// Random 10 character identifier.
pub fn short_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 10)
}

/// Normalise whitespace and strip invisible characters from an extracted title.
pub fn clean_title(title: &str) -> String {
    title
        .chars()
        .filter_map(|c| match c {
            '\u{00A0}' | '\u{1680}' | '\u{2000}'..='\u{200A}' | '\u{2028}' | '\u{2029}'
            | '\u{202F}' | '\u{205F}' | '\u{3000}' => Some(' '),
            '\u{0000}'..='\u{001F}'
            | '\u{007F}'..='\u{009F}'
            | '\u{00AD}'
            | '\u{200B}'..='\u{200D}'
            | '\u{FEFF}'
            | '\u{FFFD}' => None,
            c => Some(c),
        })
        .collect()
}

/// Build a forest from leveled rows.
///
/// A row becomes a child of the nearest preceding row with a smaller level, so a
/// jump from level 1 to level 3 nests directly under the level 1 row.
pub fn build_tree(items: &[FlatEntry]) -> Result<Vec<EntryNode>> {
    let mut roots: Vec<EntryNode> = Vec::new();
    // Open rows; a row is attached to its parent once it is popped.
    let mut stack: Vec<(u32, EntryNode)> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        if item.level == 0 {
            return Err(TocError::input(format!(
                "Entry {} ({:?}) has level 0; levels start at 1",
                i + 1,
                item.title
            )));
        }
        let page = match item.page {
            Some(page) if page >= 1 && page <= i64::from(u32::MAX) => page as u32,
            Some(page) => {
                return Err(TocError::input(format!(
                    "Entry {} ({:?}) has invalid page {}",
                    i + 1,
                    item.title,
                    page
                )))
            }
            None => {
                return Err(TocError::input(format!(
                    "Entry {} ({:?}) has no readable page number",
                    i + 1,
                    item.title
                )))
            }
        };

        while stack.last().is_some_and(|(level, _)| *level >= item.level) {
            close_top(&mut stack, &mut roots);
        }
        stack.push((item.level, EntryNode::new(clean_title(&item.title), page)));
    }

    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }

    Ok(roots)
}

fn close_top(stack: &mut Vec<(u32, EntryNode)>, roots: &mut Vec<EntryNode>) {
    if let Some((_, node)) = stack.pop() {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(node),
            None => roots.push(node),
        }
    }
}

/// Numbering rule for one nesting depth. The last rule is reused for deeper levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelConfig {
    #[serde(default)]
    pub style: CounterStyle,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub inherit_parent: bool,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    ".".to_string()
}

/// `1.` for chapters, `1.1` for everything below.
pub fn default_level_configs() -> Vec<LevelConfig> {
    vec![
        LevelConfig {
            style: CounterStyle::Decimal,
            prefix: String::new(),
            suffix: ".".to_string(),
            inherit_parent: false,
            separator: ".".to_string(),
        },
        LevelConfig {
            style: CounterStyle::Decimal,
            prefix: String::new(),
            suffix: String::new(),
            inherit_parent: true,
            separator: ".".to_string(),
        },
    ]
}

/// Prefix every title with its position, e.g. `"1.2 Setup"`.
///
/// Inherited parent numbers are re-rendered in the labelled node's own style.
/// Titles that already carry a number are not detected.
pub fn apply_custom_prefix(nodes: &[EntryNode], configs: &[LevelConfig]) -> Vec<EntryNode> {
    if configs.is_empty() {
        return nodes.to_vec();
    }
    prefix_level(nodes, configs, &[], 0)
}

fn prefix_level(
    nodes: &[EntryNode],
    configs: &[LevelConfig],
    parent_path: &[u32],
    level: usize,
) -> Vec<EntryNode> {
    let config = configs.get(level).unwrap_or(&configs[configs.len() - 1]);

    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let number = index as u32 + 1;
            let mut path = parent_path.to_vec();
            path.push(number);

            let core = if config.inherit_parent && !parent_path.is_empty() {
                path.iter()
                    .map(|n| convert(*n, config.style))
                    .collect::<Vec<_>>()
                    .join(&config.separator)
            } else {
                convert(number, config.style)
            };

            EntryNode {
                title: format!("{}{}{} {}", config.prefix, core, config.suffix, node.title),
                children: prefix_level(&node.children, configs, &path, level + 1),
                ..node.clone()
            }
        })
        .collect()
}

/// Deepest chain of entries whose remapped page is at or before `current_page`.
///
/// Siblings are assumed to be in ascending page order; the scan stops at the first
/// sibling past `current_page`.
pub fn find_active_toc_path<'a>(
    nodes: &'a [EntryNode],
    current_page: i64,
    page_offset: i64,
    add_physical_toc_page: bool,
    toc_page_count: u32,
    insert_at_page: u32,
) -> Vec<&'a EntryNode> {
    let mut best = Vec::new();

    for node in nodes {
        let Some(page) = node.target.page() else {
            continue;
        };
        let mut item_page = i64::from(page) + page_offset;
        if add_physical_toc_page && item_page >= i64::from(insert_at_page) {
            item_page += i64::from(toc_page_count);
        }
        if item_page > current_page {
            break;
        }

        let mut path = vec![node];
        path.extend(find_active_toc_path(
            &node.children,
            current_page,
            page_offset,
            add_physical_toc_page,
            toc_page_count,
            insert_at_page,
        ));
        best = path;
    }

    best
}

/// Pre-order listing with zero-based depth.
pub fn flatten(nodes: &[EntryNode]) -> Vec<(usize, &EntryNode)> {
    let mut result = Vec::new();
    flatten_recursive(nodes, 0, &mut result);
    result
}

fn flatten_recursive<'a>(
    nodes: &'a [EntryNode],
    depth: usize,
    result: &mut Vec<(usize, &'a EntryNode)>,
) {
    for node in nodes {
        result.push((depth, node));
        flatten_recursive(&node.children, depth + 1, result);
    }
}

/// Reject targets that cannot be laid out or linked.
pub fn validate_forest(nodes: &[EntryNode]) -> Result<()> {
    for (_, node) in flatten(nodes) {
        match &node.target {
            EntryTarget::Page(0) | EntryTarget::Position(0, _, _) => {
                return Err(TocError::input(format!(
                    "Entry {:?} targets page 0; pages start at 1",
                    node.title
                )));
            }
            EntryTarget::Position(_, x, y) if !x.is_finite() || !y.is_finite() => {
                return Err(TocError::input(format!(
                    "Entry {:?} has a non-finite position",
                    node.title
                )));
            }
            EntryTarget::Uri(uri) if uri.trim().is_empty() => {
                return Err(TocError::input(format!(
                    "Entry {:?} has an empty link",
                    node.title
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parse entries from JSON: either nested `{title, to, children}` nodes or flat
/// `{title, level, page}` rows, which are nested with [`build_tree`].
pub fn parse_entries(json: &str) -> Result<Vec<EntryNode>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let flat = value
        .as_array()
        .is_some_and(|items| items.iter().any(|item| item.get("to").is_none()));
    let nodes = if flat {
        let rows: Vec<FlatEntry> = serde_json::from_value(value)?;
        build_tree(&rows)?
    } else {
        serde_json::from_value(value)?
    };
    validate_forest(&nodes)?;
    Ok(nodes)
}
