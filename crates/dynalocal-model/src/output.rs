//! Output types for the `Scan` and `Query` operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::types::ConsumedCapacity;

/// Output for the `Query` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOutput {
    /// Matching items, absent when `Select=COUNT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<HashMap<String, AttributeValue>>>,

    /// The number of items that matched the filter.
    pub count: i32,

    /// The number of items evaluated before the filter was applied.
    pub scanned_count: i32,

    /// Key of the last evaluated item; pass as `ExclusiveStartKey` to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<HashMap<String, AttributeValue>>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// Output for the `Scan` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanOutput {
    /// Matching items, absent when `Select=COUNT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<HashMap<String, AttributeValue>>>,

    /// The number of items that matched the filter.
    pub count: i32,

    /// The number of items evaluated before the filter was applied.
    pub scanned_count: i32,

    /// Key of the last evaluated item; pass as `ExclusiveStartKey` to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<HashMap<String, AttributeValue>>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}
