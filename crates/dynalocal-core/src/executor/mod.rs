//! Scan and Query execution.
//!
//! A call moves through `Init -> Iterating -> Paginating -> Done`: the request
//! is validated in full, one iterator is opened on the storage collaborator,
//! and items are examined until the iterator ends, `Limit` items have been
//! examined or the page byte budget is spent.
//!
//! The executor holds no mutable state and can be shared between threads.

mod query;
mod request;
mod scan;

use std::collections::HashMap;

use dynalocal_model::types::{Capacity, ConsumedCapacity, ReturnConsumedCapacity, Select};
use dynalocal_model::{AttributeValue, DynamoDBError, Item};
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::error::expression_error_to_dynamodb;
use crate::expression::{AttributePath, EvalContext, Expr, project};
use crate::key_condition::KeyCondition;
use crate::schema::{IndexKind, IndexSchema, TableSchema};
use crate::storage::{ItemIter, calculate_item_size};

pub use request::MAX_TOTAL_SEGMENTS;

/// Read units are charged per started 4 KB.
const READ_UNIT_BYTES: u64 = 4096;

/// Scan/Query executor.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor with the given configuration.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// The executor's configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

/// Everything the page loop needs to know about one request.
struct PagePlan<'a> {
    schema: &'a TableSchema,
    index: Option<&'a IndexSchema>,
    /// Sort key condition, checked before an item counts as examined.
    key: Option<&'a KeyCondition>,
    filter: Option<&'a Expr>,
    names: &'a HashMap<String, String>,
    values: &'a HashMap<String, AttributeValue>,
    projection: Option<&'a [AttributePath]>,
    select: Select,
    limit: Option<usize>,
    max_page_bytes: u64,
}

/// Result of one page.
#[derive(Debug, Default)]
struct Page {
    items: Vec<Item>,
    count: usize,
    scanned_count: usize,
    bytes: u64,
    last_evaluated_key: Option<Item>,
}

impl PagePlan<'_> {
    /// The item as the view exposes it. Global indexes and `KEYS_ONLY` or
    /// `INCLUDE` local indexes hold projected copies; a local index read with
    /// `ALL_ATTRIBUTES` or a projection fetches from the table.
    fn view_item(&self, item: Item) -> Item {
        match self.index {
            Some(index)
                if index.kind == IndexKind::Global
                    || !matches!(
                        self.select,
                        Select::AllAttributes | Select::SpecificAttributes
                    ) =>
            {
                self.schema.project_for_index(index, &item)
            }
            _ => item,
        }
    }

    fn matches(&self, item: &Item) -> Result<bool, DynamoDBError> {
        let Some(filter) = self.filter else {
            return Ok(true);
        };
        EvalContext {
            item,
            names: self.names,
            values: self.values,
        }
        .evaluate(filter)
        .map_err(expression_error_to_dynamodb)
    }

    fn run(&self, items: ItemIter) -> Result<Page, DynamoDBError> {
        let view_schema = self.schema.view_key_schema(self.index);
        let mut page = Page::default();

        for (_, item) in items {
            if let Some(key) = self.key {
                if !key.matches(view_schema, &item) {
                    continue;
                }
            }
            let key = self.schema.extract_key(self.index, &item);
            let item = self.view_item(item);

            page.scanned_count += 1;
            page.bytes += calculate_item_size(&item);
            if self.matches(&item)? {
                page.count += 1;
                if self.select != Select::Count {
                    page.items.push(match self.projection {
                        Some(paths) => project(paths, &item, self.names),
                        None => item,
                    });
                }
            }

            let limit_reached = self.limit.is_some_and(|limit| page.scanned_count >= limit);
            if limit_reached || page.bytes >= self.max_page_bytes {
                page.last_evaluated_key = key;
                break;
            }
        }
        Ok(page)
    }
}

/// Capacity consumed by reading `bytes`.
fn read_units(bytes: u64, consistent_read: bool) -> f64 {
    let units = bytes.div_ceil(READ_UNIT_BYTES).max(1);
    #[allow(clippy::cast_precision_loss)]
    let units = units as f64;
    if consistent_read { units } else { units * 0.5 }
}

/// Build `ConsumedCapacity` for a read of `bytes` from a table or index.
fn consumed_capacity(
    mode: Option<&ReturnConsumedCapacity>,
    schema: &TableSchema,
    index: Option<&IndexSchema>,
    bytes: u64,
    consistent_read: bool,
) -> Option<ConsumedCapacity> {
    let mode = mode.filter(|m| m.should_report())?;
    let units = read_units(bytes, consistent_read);
    let mut consumed = ConsumedCapacity {
        table_name: Some(schema.name.clone()),
        capacity_units: Some(units),
        read_capacity_units: Some(units),
        ..ConsumedCapacity::default()
    };
    if mode.should_report_indexes() {
        let capacity = |units: f64| Capacity {
            read_capacity_units: Some(units),
            capacity_units: Some(units),
        };
        match index {
            None => consumed.table = Some(capacity(units)),
            Some(index) => {
                consumed.table = Some(capacity(0.0));
                let breakdown = match index.kind {
                    IndexKind::Global => &mut consumed.global_secondary_indexes,
                    IndexKind::Local => &mut consumed.local_secondary_indexes,
                };
                breakdown.insert(index.name.clone(), capacity(units));
            }
        }
    }
    Some(consumed)
}

fn clamp_count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn log_page(operation: &str, schema: &TableSchema, index: Option<&IndexSchema>, page: &Page) {
    debug!(
        operation,
        table = %schema.name,
        index = index.map(|i| i.name.as_str()),
        scanned_count = page.scanned_count,
        count = page.count,
        bytes = page.bytes,
        has_more = page.last_evaluated_key.is_some(),
        "page complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_round_read_units_up_per_4kb() {
        assert!((read_units(0, true) - 1.0).abs() < f64::EPSILON);
        assert!((read_units(4096, true) - 1.0).abs() < f64::EPSILON);
        assert!((read_units(4097, true) - 2.0).abs() < f64::EPSILON);
        assert!((read_units(4097, false) - 1.0).abs() < f64::EPSILON);
        assert!((read_units(10, false) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_skip_capacity_unless_requested() {
        use crate::schema::{KeyAttribute, KeySchema};
        use dynalocal_model::types::ScalarAttributeType;

        let schema = TableSchema::new(
            "t1",
            KeySchema {
                partition_key: KeyAttribute::new("pk", ScalarAttributeType::S),
                sort_key: None,
            },
        );
        assert!(consumed_capacity(None, &schema, None, 10, false).is_none());
        assert!(
            consumed_capacity(Some(&ReturnConsumedCapacity::None), &schema, None, 10, false)
                .is_none()
        );
        let total =
            consumed_capacity(Some(&ReturnConsumedCapacity::Total), &schema, None, 10, false)
                .unwrap();
        assert_eq!(total.capacity_units, Some(0.5));
        assert!(total.table.is_none());
        let indexes =
            consumed_capacity(Some(&ReturnConsumedCapacity::Indexes), &schema, None, 10, true)
                .unwrap();
        assert_eq!(indexes.table.unwrap().capacity_units, Some(1.0));
    }
}
