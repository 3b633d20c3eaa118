//! Table and index key schemas as consumed by the executor.
//!
//! The executor never derives schemas; it reads them from the storage
//! collaborator. This module turns the wire-level `KeySchemaElement` and
//! `AttributeDefinition` lists into typed key descriptions and answers the
//! questions the executor asks of them: which attributes form a view's key,
//! which attributes an index projects, and whether a start key has the right
//! shape.

use std::collections::HashMap;

use dynalocal_model::types::{
    AttributeDefinition, GlobalSecondaryIndex, KeySchemaElement, KeyType, LocalSecondaryIndex,
    Projection, ProjectionType, ScalarAttributeType,
};
use dynalocal_model::{AttributeValue, DynamoDBError, Item};

/// Parsed key schema for a table or index: a partition key and an optional
/// sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Partition (HASH) key name and type.
    pub partition_key: KeyAttribute,
    /// Optional sort (RANGE) key name and type.
    pub sort_key: Option<KeyAttribute>,
}

/// A single key attribute definition with its name and scalar type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    /// The attribute name.
    pub name: String,
    /// The scalar type (S, N, or B).
    pub attr_type: ScalarAttributeType,
}

impl KeyAttribute {
    /// Convenience constructor.
    #[must_use]
    pub fn new(name: impl Into<String>, attr_type: ScalarAttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
        }
    }
}

impl KeySchema {
    /// Parse key schema elements, looking up each key's type in
    /// `definitions`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if there is no HASH element or a key has no
    /// matching attribute definition.
    pub fn from_elements(
        elements: &[KeySchemaElement],
        definitions: &[AttributeDefinition],
    ) -> Result<Self, DynamoDBError> {
        let mut partition_key = None;
        let mut sort_key = None;

        for elem in elements {
            match elem.key_type {
                KeyType::Hash => partition_key = Some(elem.attribute_name.as_str()),
                KeyType::Range => sort_key = Some(elem.attribute_name.as_str()),
            }
        }

        let pk_name = partition_key
            .ok_or_else(|| DynamoDBError::validation("Key schema must contain a HASH key element"))?;

        Ok(Self {
            partition_key: KeyAttribute::new(pk_name, find_attribute_type(definitions, pk_name)?),
            sort_key: sort_key
                .map(|name| find_attribute_type(definitions, name).map(|t| KeyAttribute::new(name, t)))
                .transpose()?,
        })
    }

    /// The key attributes, partition key first.
    pub fn attributes(&self) -> impl Iterator<Item = &KeyAttribute> {
        std::iter::once(&self.partition_key).chain(self.sort_key.as_ref())
    }

    /// Returns `true` if `name` is the partition or sort key.
    #[must_use]
    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.attributes().any(|attr| attr.name == name)
    }
}

fn find_attribute_type(
    definitions: &[AttributeDefinition],
    name: &str,
) -> Result<ScalarAttributeType, DynamoDBError> {
    definitions
        .iter()
        .find(|d| d.attribute_name == name)
        .map(|d| d.attribute_type)
        .ok_or_else(|| {
            DynamoDBError::validation(format!(
                "One or more parameter values were invalid: Some index key schema elements are \
                 not valid. The following index key schema element does not have a matching \
                 AttributeDefinition: {name}"
            ))
        })
}

/// Global or local secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Global secondary index: its own partition key.
    Global,
    /// Local secondary index: the table's partition key, another sort key.
    Local,
}

/// A secondary index as seen by Scan and Query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Global or local.
    pub kind: IndexKind,
    /// The index's own key schema.
    pub key_schema: KeySchema,
    /// Attributes projected into the index.
    pub projection: Projection,
}

impl IndexSchema {
    /// Build from a GSI definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the key schema cannot be parsed.
    pub fn global(
        index: &GlobalSecondaryIndex,
        definitions: &[AttributeDefinition],
    ) -> Result<Self, DynamoDBError> {
        Ok(Self {
            name: index.index_name.clone(),
            kind: IndexKind::Global,
            key_schema: KeySchema::from_elements(&index.key_schema, definitions)?,
            projection: index.projection.clone(),
        })
    }

    /// Build from an LSI definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the key schema cannot be parsed.
    pub fn local(
        index: &LocalSecondaryIndex,
        definitions: &[AttributeDefinition],
    ) -> Result<Self, DynamoDBError> {
        Ok(Self {
            name: index.index_name.clone(),
            kind: IndexKind::Local,
            key_schema: KeySchema::from_elements(&index.key_schema, definitions)?,
            projection: index.projection.clone(),
        })
    }

    /// Projection type, defaulting to `ALL` when unset.
    #[must_use]
    pub fn projection_type(&self) -> ProjectionType {
        self.projection.projection_type.clone().unwrap_or_default()
    }

    /// Returns `true` when every table attribute is projected.
    #[must_use]
    pub fn projects_all(&self) -> bool {
        self.projection_type() == ProjectionType::All
    }
}

/// Everything the executor needs to know about one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// The table's primary key.
    pub key_schema: KeySchema,
    /// Secondary indexes, global and local.
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    /// A table without secondary indexes.
    #[must_use]
    pub fn new(name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            name: name.into(),
            key_schema,
            indexes: Vec::new(),
        }
    }

    /// Add a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Key attributes identifying an item in a view: the index keys first,
    /// then any table keys not already among them.
    #[must_use]
    pub fn view_keys<'a>(&'a self, index: Option<&'a IndexSchema>) -> Vec<&'a KeyAttribute> {
        let mut keys: Vec<&KeyAttribute> = Vec::new();
        if let Some(index) = index {
            keys.extend(index.key_schema.attributes());
        }
        for attr in self.key_schema.attributes() {
            if !keys.iter().any(|k| k.name == attr.name) {
                keys.push(attr);
            }
        }
        keys
    }

    /// The key schema a view is partitioned and sorted by.
    #[must_use]
    pub fn view_key_schema<'a>(&'a self, index: Option<&'a IndexSchema>) -> &'a KeySchema {
        index.map_or(&self.key_schema, |index| &index.key_schema)
    }

    /// Copy of `item` restricted to what `index` projects. Table and index
    /// keys are always kept.
    #[must_use]
    pub fn project_for_index(&self, index: &IndexSchema, item: &Item) -> Item {
        match index.projection_type() {
            ProjectionType::All => item.clone(),
            projection_type => {
                let keys = self.view_keys(Some(index));
                item.iter()
                    .filter(|(name, _)| {
                        keys.iter().any(|k| &k.name == *name)
                            || (projection_type == ProjectionType::Include
                                && index.projection.non_key_attributes.contains(*name))
                    })
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            }
        }
    }

    /// Extract the key of `item` in a view, or `None` if the item lacks a key
    /// attribute (such items are absent from the index).
    #[must_use]
    #[allow(clippy::implicit_hasher)]
    pub fn extract_key(
        &self,
        index: Option<&IndexSchema>,
        item: &HashMap<String, AttributeValue>,
    ) -> Option<Item> {
        self.view_keys(index)
            .into_iter()
            .map(|attr| {
                let value = item.get(&attr.name).filter(|v| attr.attr_type.matches(v))?;
                Some((attr.name.clone(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn table_with_index(projection: Projection) -> TableSchema {
        TableSchema::new(
            "music",
            KeySchema {
                partition_key: KeyAttribute::new("artist", ScalarAttributeType::S),
                sort_key: Some(KeyAttribute::new("song", ScalarAttributeType::S)),
            },
        )
        .with_index(IndexSchema {
            name: "by_album".to_owned(),
            kind: IndexKind::Global,
            key_schema: KeySchema {
                partition_key: KeyAttribute::new("album", ScalarAttributeType::S),
                sort_key: Some(KeyAttribute::new("song", ScalarAttributeType::S)),
            },
            projection,
        })
    }

    #[test]
    fn test_should_parse_key_schema_elements() {
        let elements = vec![
            KeySchemaElement {
                attribute_name: "pk".to_owned(),
                key_type: KeyType::Hash,
            },
            KeySchemaElement {
                attribute_name: "sk".to_owned(),
                key_type: KeyType::Range,
            },
        ];
        let definitions = vec![
            AttributeDefinition {
                attribute_name: "pk".to_owned(),
                attribute_type: ScalarAttributeType::S,
            },
            AttributeDefinition {
                attribute_name: "sk".to_owned(),
                attribute_type: ScalarAttributeType::N,
            },
        ];
        let schema = KeySchema::from_elements(&elements, &definitions).unwrap();
        assert_eq!(schema.partition_key.name, "pk");
        assert_eq!(schema.sort_key.unwrap().attr_type, ScalarAttributeType::N);

        let err = KeySchema::from_elements(&elements, &definitions[..1]).unwrap_err();
        assert!(err.message.ends_with("AttributeDefinition: sk"));
    }

    #[test]
    fn test_should_order_view_keys_index_first() {
        let table = table_with_index(Projection::default());
        let index = table.index("by_album");
        let names: Vec<&str> = table
            .view_keys(index)
            .iter()
            .map(|k| k.name.as_str())
            .collect();
        assert_eq!(names, vec!["album", "song", "artist"]);
        assert!(table.index("missing").is_none());
    }

    #[test]
    fn test_should_project_keys_and_included_attributes() {
        let table = table_with_index(Projection {
            projection_type: Some(ProjectionType::Include),
            non_key_attributes: vec!["year".to_owned()],
        });
        let index = table.index("by_album").unwrap();
        let item = make_item(&[
            ("artist", s("a")),
            ("song", s("s")),
            ("album", s("al")),
            ("year", s("1999")),
            ("lyrics", s("...")),
        ]);
        let projected = table.project_for_index(index, &item);
        assert_eq!(projected.len(), 4);
        assert!(!projected.contains_key("lyrics"));
    }

    #[test]
    fn test_should_skip_items_without_index_key() {
        let table = table_with_index(Projection::default());
        let index = table.index("by_album");
        let item = make_item(&[("artist", s("a")), ("song", s("s"))]);
        assert!(table.extract_key(index, &item).is_none());
        let key = table.extract_key(None, &item).unwrap();
        assert_eq!(key.len(), 2);
    }
}
