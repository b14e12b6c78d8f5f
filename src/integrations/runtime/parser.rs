//! Listing output parser
//!
//! The runtime CLI has emitted several listing formats across versions: a
//! JSON array of objects, a whitespace table with a header row, and a bare
//! positional table. Each format is a [`ParseStrategy`]; the parser tries
//! them in order and the first one that recognises the output wins.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::ContainerRecord;

/// Status assigned to a table row that has no status column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingStatus {
    #[default]
    Unknown,
    Running,
}

impl MissingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
        }
    }
}

/// Leading header tokens that mark a table header row
const HEADER_MARKERS: [&str; 3] = ["ID", "NAME", "CONTAINER"];

/// Column used for the status when neither STATE nor STATUS is in the header
const DEFAULT_STATUS_COLUMN: usize = 4;

/// One output format the parser knows how to read
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means the output is not in this strategy's format
    fn parse(&self, output: &str) -> Option<Vec<ContainerRecord>>;
}

/// JSON array of objects with at least a `name` key
pub struct JsonListing;

impl ParseStrategy for JsonListing {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, output: &str) -> Option<Vec<ContainerRecord>> {
        let items: Vec<Map<String, Value>> = serde_json::from_str(output).ok()?;

        let records = items
            .iter()
            .filter_map(|item| {
                let name = string_field(item, "name").filter(|n| !n.is_empty())?;
                let status = string_field(item, "state")
                    .or_else(|| string_field(item, "status"))
                    .unwrap_or_else(|| "unknown".to_string());

                Some(
                    ContainerRecord::new(name, status)
                        .with_image(string_field(item, "image"))
                        .with_ports(string_field(item, "ports"))
                        .with_created(string_field(item, "created")),
                )
            })
            .collect();

        Some(records)
    }
}

fn string_field(item: &Map<String, Value>, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Table whose columns are located through a header row
pub struct HeaderTable {
    missing_status: MissingStatus,
}

impl HeaderTable {
    pub fn new(missing_status: MissingStatus) -> Self {
        Self { missing_status }
    }
}

/// Column positions resolved from a header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    name: usize,
    image: usize,
    status: usize,
    address: Option<usize>,
}

impl Columns {
    fn from_header(header: &HashMap<String, usize>) -> Self {
        let find = |keys: &[&str]| keys.iter().find_map(|k| header.get(*k).copied());

        Self {
            name: find(&["ID", "NAME", "CONTAINER"]).unwrap_or(0),
            image: find(&["IMAGE"]).unwrap_or(1),
            status: find(&["STATE", "STATUS"]).unwrap_or(DEFAULT_STATUS_COLUMN),
            address: find(&["ADDR", "ADDRESS"]),
        }
    }
}

impl ParseStrategy for HeaderTable {
    fn name(&self) -> &'static str {
        "header-table"
    }

    fn parse(&self, output: &str) -> Option<Vec<ContainerRecord>> {
        let table = Table::split(output);
        let columns = Columns::from_header(table.header.as_ref()?);

        let records = table
            .rows
            .iter()
            .filter_map(|row| {
                let fields: Vec<&str> = row.split_whitespace().collect();
                let name = fields.get(columns.name).copied().unwrap_or_default();
                if name.is_empty() {
                    return None;
                }
                let status = fields
                    .get(columns.status)
                    .copied()
                    .unwrap_or(self.missing_status.as_str());
                let field = |idx: usize| fields.get(idx).map(|s| s.to_string());

                Some(
                    ContainerRecord::new(name, status)
                        .with_image(field(columns.image))
                        .with_ports(columns.address.and_then(field)),
                )
            })
            .collect();

        Some(records)
    }
}

/// Headerless table: name, image, and the status in the fifth column
pub struct PositionalTable {
    missing_status: MissingStatus,
}

impl PositionalTable {
    pub fn new(missing_status: MissingStatus) -> Self {
        Self { missing_status }
    }
}

impl ParseStrategy for PositionalTable {
    fn name(&self) -> &'static str {
        "positional-table"
    }

    fn parse(&self, output: &str) -> Option<Vec<ContainerRecord>> {
        let table = Table::split(output);

        let records = table
            .rows
            .iter()
            .filter_map(|row| {
                let fields: Vec<&str> = row.split_whitespace().collect();
                let name = *fields.first()?;
                let status = fields
                    .get(DEFAULT_STATUS_COLUMN)
                    .copied()
                    .unwrap_or(self.missing_status.as_str());

                Some(
                    ContainerRecord::new(name, status)
                        .with_image(fields.get(1).map(|s| s.to_string())),
                )
            })
            .collect();

        Some(records)
    }
}

/// Lines of a text table, split into the header map and data rows
struct Table<'a> {
    header: Option<HashMap<String, usize>>,
    rows: Vec<&'a str>,
}

impl<'a> Table<'a> {
    fn split(output: &'a str) -> Self {
        let mut header = None;
        let mut rows = Vec::new();

        for line in output.lines().map(str::trim) {
            if line.is_empty() || line.starts_with("---") {
                continue;
            }
            if is_header(line) {
                // Repeated header rows are skipped; the first one defines the columns
                if header.is_none() {
                    header = Some(
                        line.split_whitespace()
                            .enumerate()
                            .map(|(idx, token)| (token.to_uppercase(), idx))
                            .collect(),
                    );
                }
                continue;
            }
            rows.push(line);
        }

        Self { header, rows }
    }
}

fn is_header(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map(|first| {
            HEADER_MARKERS
                .iter()
                .any(|marker| first.eq_ignore_ascii_case(marker))
        })
        .unwrap_or(false)
}

/// Ordered chain of strategies; never fails, worst case yields no records
pub struct OutputParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl OutputParser {
    pub fn new(missing_status: MissingStatus) -> Self {
        let strategies: Vec<Box<dyn ParseStrategy>> = vec![
            Box::new(JsonListing),
            Box::new(HeaderTable::new(missing_status)),
            Box::new(PositionalTable::new(missing_status)),
        ];
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn parse(&self, output: &str) -> Vec<ContainerRecord> {
        for strategy in &self.strategies {
            if let Some(records) = strategy.parse(output) {
                tracing::debug!(
                    format = strategy.name(),
                    count = records.len(),
                    "parsed listing"
                );
                return records;
            }
        }
        Vec::new()
    }
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new(MissingStatus::default())
    }
}
