//! Storage collaborator seen by the Scan/Query executor.
//!
//! The executor reads items through [`ItemSource`] and finds tables through
//! [`TableCatalog`]. Both iterate in [`ItemPosition`] order: hash bucket of
//! the view's partition key first, then the view's key values. A base table
//! orders by `[hash, range?]`, an index by
//! `[index hash, index range?, table hash, table range?]`.
//!
//! [`MemoryCatalog`] and [`MemoryTable`] are the in-memory reference
//! implementation:
//!
//! ```text
//! DashMap<TableName, MemoryTable { RwLock<BTreeMap<ItemPosition, Item>> }>
//! ```
//!
//! Sources yield full items for index views too; the executor applies the
//! index projection. The in-memory store derives index views from the table
//! on every read and holds its lock only while a read snapshots its range.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::{Bound, RangeInclusive};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace};

use dynalocal_model::{AttributeValue, Item, Number};

use crate::schema::{IndexSchema, TableSchema};
use crate::segment::hash_bucket;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A required key attribute was not found in the item.
    #[error("missing required key attribute: {attr}")]
    MissingKeyAttribute {
        /// The name of the missing attribute.
        attr: String,
    },
    /// A key attribute has the wrong type.
    #[error("key attribute '{attr}' has wrong type: expected {expected}, got {actual}")]
    InvalidKeyType {
        /// The name of the attribute.
        attr: String,
        /// The expected type descriptor.
        expected: String,
        /// The actual type descriptor.
        actual: String,
    },
    /// The table has no index with this name.
    #[error("The table does not have the specified index: {index}")]
    UnknownIndex {
        /// The requested index name.
        index: String,
    },
}

// ---------------------------------------------------------------------------
// Key ordering
// ---------------------------------------------------------------------------

/// A key attribute value with a total order.
///
/// - **S**: UTF-8 byte order.
/// - **N**: exact numeric order, so `2` and `2.0` are the same key.
/// - **B**: unsigned byte order.
///
/// Values of different types never share a key slot; they order `S < N < B`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// String key.
    S(String),
    /// Number key.
    N(Number),
    /// Binary key.
    B(bytes::Bytes),
}

impl KeyValue {
    /// Creates a `KeyValue` from an `AttributeValue`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKeyType` if the value is not S, N or B,
    /// or if an N value is not a number.
    pub fn from_attribute_value(
        attr_name: &str,
        value: &AttributeValue,
    ) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidKeyType {
            attr: attr_name.to_owned(),
            expected: "S, N, or B".to_owned(),
            actual: value.type_descriptor().to_owned(),
        };
        match value {
            AttributeValue::S(s) => Ok(Self::S(s.clone())),
            AttributeValue::N(n) => Number::parse_unchecked(n).map(Self::N).map_err(|_| invalid()),
            AttributeValue::B(b) => Ok(Self::B(b.clone())),
            _ => Err(invalid()),
        }
    }
}

/// Position of an item in a table or index iteration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemPosition {
    /// Hash bucket of the view's partition key.
    pub bucket: u16,
    /// View key values: index keys first, then remaining table keys.
    pub keys: Vec<KeyValue>,
}

impl ItemPosition {
    /// Smallest position in `bucket`.
    #[must_use]
    fn bucket_start(bucket: u16) -> Self {
        Self {
            bucket,
            keys: Vec::new(),
        }
    }

    /// The partition key value, first of the view keys.
    #[must_use]
    pub fn partition(&self) -> Option<&KeyValue> {
        self.keys.first()
    }
}

/// Compute the position of `item` in the view `index` of `schema`.
///
/// # Errors
///
/// Returns an error if a view key attribute is missing or mistyped.
#[allow(clippy::implicit_hasher)]
pub fn position_of(
    schema: &TableSchema,
    index: Option<&IndexSchema>,
    item: &HashMap<String, AttributeValue>,
) -> Result<ItemPosition, StorageError> {
    let mut bucket = None;
    let mut keys = Vec::new();
    for attr in schema.view_keys(index) {
        let value = item
            .get(&attr.name)
            .ok_or_else(|| StorageError::MissingKeyAttribute {
                attr: attr.name.clone(),
            })?;
        if !attr.attr_type.matches(value) {
            return Err(StorageError::InvalidKeyType {
                attr: attr.name.clone(),
                expected: attr.attr_type.as_str().to_owned(),
                actual: value.type_descriptor().to_owned(),
            });
        }
        if bucket.is_none() {
            bucket = hash_bucket(value);
        }
        keys.push(KeyValue::from_attribute_value(&attr.name, value)?);
    }
    Ok(ItemPosition {
        bucket: bucket.unwrap_or_default(),
        keys,
    })
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Items in ascending (or, for reverse queries, descending) position order.
pub type ItemIter = Box<dyn Iterator<Item = (ItemPosition, Item)> + Send>;

/// Read access to one table and its indexes.
pub trait ItemSource: Send + Sync {
    /// The table's key and index schema.
    fn schema(&self) -> &TableSchema;

    /// Iterate the items of a view whose bucket lies in `buckets`, strictly
    /// after `start_after`, in ascending position order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnknownIndex` for an unknown index.
    fn scan(
        &self,
        index: Option<&str>,
        buckets: RangeInclusive<u16>,
        start_after: Option<&ItemPosition>,
    ) -> Result<ItemIter, StorageError>;

    /// Iterate one partition of a view in sort key order, strictly after
    /// `start_after` in the direction of travel.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnknownIndex` for an unknown index, or an
    /// error if `partition` is not a valid key value.
    fn partition(
        &self,
        index: Option<&str>,
        partition: &AttributeValue,
        forward: bool,
        start_after: Option<&ItemPosition>,
    ) -> Result<ItemIter, StorageError>;
}

/// Table lookup by name.
pub trait TableCatalog: Send + Sync {
    /// The table named `name`, if it exists.
    fn table(&self, name: &str) -> Option<Arc<dyn ItemSource>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// An in-memory table ordered by [`ItemPosition`].
#[derive(Debug)]
pub struct MemoryTable {
    schema: TableSchema,
    items: RwLock<BTreeMap<ItemPosition, Item>>,
}

impl MemoryTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            items: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace an item, returning the replaced item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item lacks a table key attribute or a key has
    /// the wrong type.
    pub fn put_item(&self, item: Item) -> Result<Option<Item>, StorageError> {
        let position = position_of(&self.schema, None, &item)?;
        let size = calculate_item_size(&item);
        let old = self.items.write().insert(position, item);
        match &old {
            Some(old) => debug!(
                table = %self.schema.name,
                old_size = calculate_item_size(old),
                new_size = size,
                "replaced existing item"
            ),
            None => debug!(table = %self.schema.name, new_size = size, "inserted new item"),
        }
        Ok(old)
    }

    /// Delete the item with the given key, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is incomplete or mistyped.
    pub fn delete_item(&self, key: &Item) -> Result<Option<Item>, StorageError> {
        let position = position_of(&self.schema, None, key)?;
        let removed = self.items.write().remove(&position);
        if let Some(item) = &removed {
            debug!(table = %self.schema.name, size = calculate_item_size(item), "deleted item");
        }
        Ok(removed)
    }

    /// Number of items in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns `true` if the table holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn resolve_index(&self, index: Option<&str>) -> Result<Option<&IndexSchema>, StorageError> {
        index
            .map(|name| {
                self.schema
                    .index(name)
                    .ok_or_else(|| StorageError::UnknownIndex {
                        index: name.to_owned(),
                    })
            })
            .transpose()
    }

    /// Run `read` over the view's position-ordered map. The base table is
    /// read in place; an index view holds the full items that carry its keys.
    /// Applying the index projection is left to the reader.
    fn with_view<T>(
        &self,
        index: Option<&IndexSchema>,
        read: impl FnOnce(&BTreeMap<ItemPosition, Item>) -> T,
    ) -> T {
        let items = self.items.read();
        match index {
            None => read(&items),
            Some(index) => {
                let view: BTreeMap<ItemPosition, Item> = items
                    .values()
                    .filter_map(|item| {
                        let position = position_of(&self.schema, Some(index), item).ok()?;
                        Some((position, item.clone()))
                    })
                    .collect();
                trace!(index = %index.name, items = view.len(), "materialized index view");
                read(&view)
            }
        }
    }
}

fn lower_bound<'a>(
    start: &'a ItemPosition,
    start_after: Option<&'a ItemPosition>,
) -> Bound<&'a ItemPosition> {
    match start_after {
        Some(after) if after >= start => Bound::Excluded(after),
        _ => Bound::Included(start),
    }
}

impl ItemSource for MemoryTable {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn scan(
        &self,
        index: Option<&str>,
        buckets: RangeInclusive<u16>,
        start_after: Option<&ItemPosition>,
    ) -> Result<ItemIter, StorageError> {
        let index = self.resolve_index(index)?;
        if buckets.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let start = ItemPosition::bucket_start(*buckets.start());
        let end = match buckets.end().checked_add(1) {
            Some(next) => Bound::Excluded(ItemPosition::bucket_start(next)),
            None => Bound::Unbounded,
        };
        let lower = lower_bound(&start, start_after);
        if let (Bound::Excluded(from) | Bound::Included(from), Bound::Excluded(to)) = (lower, &end) {
            if from >= to {
                return Ok(Box::new(std::iter::empty()));
            }
        }

        let snapshot: Vec<(ItemPosition, Item)> = self.with_view(index, |view| {
            view.range((lower, end.as_ref()))
                .map(|(position, item)| (position.clone(), item.clone()))
                .collect()
        });
        trace!(
            table = %self.schema.name,
            buckets = ?buckets,
            items = snapshot.len(),
            "scan snapshot"
        );
        Ok(Box::new(snapshot.into_iter()))
    }

    fn partition(
        &self,
        index: Option<&str>,
        partition: &AttributeValue,
        forward: bool,
        start_after: Option<&ItemPosition>,
    ) -> Result<ItemIter, StorageError> {
        let index = self.resolve_index(index)?;
        let key_attr = &self.schema.view_key_schema(index).partition_key;
        let key = KeyValue::from_attribute_value(&key_attr.name, partition)?;
        let start = ItemPosition {
            bucket: hash_bucket(partition).unwrap_or_default(),
            keys: vec![key.clone()],
        };

        let mut snapshot: Vec<(ItemPosition, Item)> = self.with_view(index, |view| {
            view.range(&start..)
                .take_while(|(position, _)| position.partition() == Some(&key))
                .map(|(position, item)| (position.clone(), item.clone()))
                .collect()
        });
        if !forward {
            snapshot.reverse();
        }
        if let Some(after) = start_after {
            let past = if forward {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            snapshot.retain(|(position, _)| position.cmp(after) == past);
        }
        trace!(
            table = %self.schema.name,
            forward,
            items = snapshot.len(),
            "partition snapshot"
        );
        Ok(Box::new(snapshot.into_iter()))
    }
}

/// Tables by name.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: DashMap<String, Arc<MemoryTable>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing any table of the same name.
    pub fn create_table(&self, schema: TableSchema) -> Arc<MemoryTable> {
        let name = schema.name.clone();
        let table = Arc::new(MemoryTable::new(schema));
        self.tables.insert(name.clone(), Arc::clone(&table));
        debug!(table = %name, "created table");
        table
    }

    /// The concrete table named `name`, for writes.
    #[must_use]
    pub fn table_handle(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

impl TableCatalog for MemoryCatalog {
    fn table(&self, name: &str) -> Option<Arc<dyn ItemSource>> {
        self.table_handle(name)
            .map(|table| table as Arc<dyn ItemSource>)
    }
}

// ---------------------------------------------------------------------------
// Item size
// ---------------------------------------------------------------------------

/// Calculates the approximate size of a DynamoDB item in bytes.
///
/// Follows DynamoDB's item size rules:
/// - **Attribute name**: UTF-8 byte length
/// - **S**: UTF-8 byte length
/// - **N**: `(digits / 2) + 1` bytes (approximate)
/// - **B**: byte length
/// - **Bool / Null**: 1 byte
/// - **SS / NS / BS**: sum of element sizes
/// - **L**: `3 + sum(1 + element_size)` for each element
/// - **M**: `3 + sum(key_len + 1 + value_size)` for each entry
#[must_use]
#[allow(clippy::implicit_hasher)]
pub fn calculate_item_size(item: &HashMap<String, AttributeValue>) -> u64 {
    item.iter()
        .map(|(name, value)| name.len() as u64 + calculate_value_size(value))
        .sum()
}

fn number_size(n: &str) -> u64 {
    (n.len().div_ceil(2) + 1) as u64
}

fn calculate_value_size(value: &AttributeValue) -> u64 {
    match value {
        AttributeValue::S(s) => s.len() as u64,
        AttributeValue::N(n) => number_size(n),
        AttributeValue::B(b) => b.len() as u64,
        AttributeValue::Bool(_) | AttributeValue::Null(_) => 1,
        AttributeValue::Ss(v) => v.iter().map(|s| s.len() as u64).sum(),
        AttributeValue::Ns(v) => v.iter().map(|n| number_size(n)).sum(),
        AttributeValue::Bs(v) => v.iter().map(|b| b.len() as u64).sum(),
        AttributeValue::L(list) => {
            3 + list
                .iter()
                .map(|elem| 1 + calculate_value_size(elem))
                .sum::<u64>()
        }
        AttributeValue::M(map) => {
            3 + map
                .iter()
                .map(|(k, v)| k.len() as u64 + 1 + calculate_value_size(v))
                .sum::<u64>()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
