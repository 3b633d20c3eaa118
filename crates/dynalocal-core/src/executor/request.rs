//! Request validation shared by Scan and Query.
//!
//! Everything here runs before the first item is read. Checks are grouped by
//! the stage of the request pipeline that runs them.

use std::collections::HashMap;

use dynalocal_model::types::Select;
use dynalocal_model::{AttributeValue, DynamoDBError, Item, ValidationErrors, validate_attribute_value};

use crate::error::expression_error_in;
use crate::expression::{
    AttributePath, Expr, ExpressionError, Usage, analyze_condition, analyze_projection,
    check_length, parse_condition, parse_projection,
};
use crate::schema::{IndexKind, IndexSchema, TableSchema};
use crate::storage::{ItemPosition, position_of};

/// Largest accepted `TotalSegments`.
pub const MAX_TOTAL_SEGMENTS: i32 = 1_000_000;

const NAME_PATTERN: &str = "[a-zA-Z0-9_.-]+";

// ---------------------------------------------------------------------------
// Field constraints
// ---------------------------------------------------------------------------

fn is_valid_name(name: &str) -> bool {
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Record `tableName` length and pattern violations.
pub(crate) fn check_table_name(errors: &mut ValidationErrors, name: &str) {
    check_name(errors, "tableName", name, 255);
}

/// Record `indexName` length and pattern violations.
pub(crate) fn check_index_name(errors: &mut ValidationErrors, name: Option<&str>) {
    if let Some(name) = name {
        check_name(errors, "indexName", name, 255);
    }
}

fn check_name(errors: &mut ValidationErrors, field: &str, name: &str, max: usize) {
    if name.len() < 3 {
        errors.constraint(name, field, "Member must have length greater than or equal to 3");
    } else if name.len() > max {
        errors.constraint(
            name,
            field,
            &format!("Member must have length less than or equal to {max}"),
        );
    }
    if !is_valid_name(name) {
        errors.constraint(
            name,
            field,
            &format!("Member must satisfy regular expression pattern: {NAME_PATTERN}"),
        );
    }
}

/// Record a `limit` below 1.
pub(crate) fn check_limit(errors: &mut ValidationErrors, limit: Option<i32>) {
    if let Some(limit) = limit {
        if limit < 1 {
            errors.constraint(limit, "limit", "Member must have value greater than or equal to 1");
        }
    }
}

/// Record `totalSegments` and `segment` range violations.
pub(crate) fn check_segment_ranges(
    errors: &mut ValidationErrors,
    segment: Option<i32>,
    total_segments: Option<i32>,
) {
    if let Some(total) = total_segments {
        if total < 1 {
            errors.constraint(
                total,
                "totalSegments",
                "Member must have value greater than or equal to 1",
            );
        } else if total > MAX_TOTAL_SEGMENTS {
            errors.constraint(
                total,
                "totalSegments",
                &format!("Member must have value less than or equal to {MAX_TOTAL_SEGMENTS}"),
            );
        }
    }
    if let Some(segment) = segment {
        if segment < 0 {
            errors.constraint(
                segment,
                "segment",
                "Member must have value greater than or equal to 0",
            );
        } else if segment >= MAX_TOTAL_SEGMENTS {
            errors.constraint(
                segment,
                "segment",
                &format!(
                    "Member must have value less than or equal to {}",
                    MAX_TOTAL_SEGMENTS - 1
                ),
            );
        }
    }
}

/// Pair `Segment` with `TotalSegments`, defaulting to a single segment.
///
/// Ranges have already been checked.
pub(crate) fn resolve_segments(
    segment: Option<i32>,
    total_segments: Option<i32>,
) -> Result<(u32, u32), DynamoDBError> {
    match (segment, total_segments) {
        (None, None) => Ok((0, 1)),
        (Some(_), None) => Err(DynamoDBError::validation(
            "The TotalSegments parameter is required but was not present in the request when \
             parameter Segment is present",
        )),
        (None, Some(_)) => Err(DynamoDBError::validation(
            "The Segment parameter is required but was not present in the request when \
             parameter TotalSegments is present",
        )),
        (Some(seg), Some(total)) => {
            if seg >= total {
                return Err(DynamoDBError::validation(format!(
                    "The Segment parameter is zero-indexed and must be less than parameter \
                     TotalSegments. Segment: {seg}, TotalSegments: {total}"
                )));
            }
            let seg = u32::try_from(seg).map_err(|_| DynamoDBError::validation("Invalid Segment"))?;
            let total = u32::try_from(total)
                .map_err(|_| DynamoDBError::validation("Invalid TotalSegments"))?;
            Ok((seg, total))
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter combinations
// ---------------------------------------------------------------------------

/// Reject requests mixing legacy parameters with expression parameters.
///
/// Both slices list the parameters present in the request, in message order.
pub(crate) fn check_not_mixed(legacy: &[&str], expressions: &[&str]) -> Result<(), DynamoDBError> {
    if legacy.is_empty() || expressions.is_empty() {
        return Ok(());
    }
    Err(DynamoDBError::validation(format!(
        "Can not use both expression and non-expression parameters in the same request: \
         Non-expression parameters: {{{}}} Expression parameters: {{{}}}",
        legacy.join(", "),
        expressions.join(", ")
    )))
}

/// Check `AttributesToGet` and convert it to literal projection paths.
pub(crate) fn attributes_to_get(
    attributes: Option<&[String]>,
) -> Result<Option<Vec<AttributePath>>, DynamoDBError> {
    let Some(attributes) = attributes else {
        return Ok(None);
    };
    if attributes.is_empty() {
        return Err(DynamoDBError::validation(
            "One or more parameter values are not valid. The AttributesToGet parameter must \
             contain at least one element",
        ));
    }
    for (i, name) in attributes.iter().enumerate() {
        if attributes[..i].contains(name) {
            return Err(DynamoDBError::validation(format!(
                "One or more parameter values were invalid: Duplicate value in attribute name: \
                 {name}"
            )));
        }
    }
    Ok(Some(
        attributes.iter().map(AttributePath::attribute).collect(),
    ))
}

/// Check `Select` against the projection parameters.
pub(crate) fn validate_select(
    select: Option<Select>,
    has_projection: bool,
    has_attributes_to_get: bool,
) -> Result<(), DynamoDBError> {
    match select {
        Some(Select::SpecificAttributes) => {
            if !has_projection && !has_attributes_to_get {
                return Err(DynamoDBError::validation(
                    "SPECIFIC_ATTRIBUTES requires either ProjectionExpression or AttributesToGet",
                ));
            }
        }
        Some(sel @ (Select::AllAttributes | Select::AllProjectedAttributes | Select::Count)) => {
            if has_attributes_to_get {
                return Err(DynamoDBError::validation(format!(
                    "Cannot specify the AttributesToGet when choosing to get {} results",
                    sel.as_str()
                )));
            }
            if has_projection {
                return Err(DynamoDBError::validation(format!(
                    "Cannot specify the ProjectionExpression when choosing to get {} results",
                    sel.as_str()
                )));
            }
        }
        None => {}
    }
    Ok(())
}

/// Resolve the effective `Select` for a view and check it against the index.
pub(crate) fn resolve_select(
    select: Option<Select>,
    index: Option<&IndexSchema>,
    has_projection: bool,
) -> Result<Select, DynamoDBError> {
    let select = match (select, index) {
        (Some(select), _) => select,
        (None, _) if has_projection => Select::SpecificAttributes,
        (None, Some(_)) => Select::AllProjectedAttributes,
        (None, None) => Select::AllAttributes,
    };
    match (select, index) {
        (Select::AllProjectedAttributes, None) => Err(DynamoDBError::validation(
            "ALL_PROJECTED_ATTRIBUTES is only supported for queries on secondary indexes",
        )),
        (Select::AllAttributes, Some(index))
            if index.kind == IndexKind::Global && !index.projects_all() =>
        {
            Err(DynamoDBError::validation(format!(
                "One or more parameter values were invalid: Select type ALL_ATTRIBUTES is not \
                 supported for global secondary index {} because its projection type is not ALL",
                index.name
            )))
        }
        _ => Ok(select),
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Parse and analyze a condition carried by the request parameter
/// `parameter`, merging the referenced placeholders into `usage`.
pub(crate) fn prepare_condition(
    parameter: &str,
    text: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
    max_bytes: usize,
    usage: &mut Usage,
) -> Result<Expr, DynamoDBError> {
    let wrap = |e: ExpressionError| expression_error_in(parameter, &e);
    check_length(text, max_bytes).map_err(wrap)?;
    let expr = parse_condition(text).map_err(wrap)?;
    usage.merge(analyze_condition(&expr, names, values).map_err(wrap)?);
    Ok(expr)
}

/// Parse and analyze a `ProjectionExpression`, merging the referenced names
/// into `usage`.
pub(crate) fn prepare_projection(
    text: &str,
    names: &HashMap<String, String>,
    max_bytes: usize,
    usage: &mut Usage,
) -> Result<Vec<AttributePath>, DynamoDBError> {
    let wrap = |e: ExpressionError| expression_error_in("ProjectionExpression", &e);
    check_length(text, max_bytes).map_err(wrap)?;
    let paths = parse_projection(text).map_err(wrap)?;
    usage.merge(analyze_projection(&paths, names).map_err(wrap)?);
    Ok(paths)
}

// ---------------------------------------------------------------------------
// Table and start key
// ---------------------------------------------------------------------------

/// Look up the requested index.
pub(crate) fn resolve_index<'s>(
    schema: &'s TableSchema,
    index_name: Option<&str>,
) -> Result<Option<&'s IndexSchema>, DynamoDBError> {
    index_name
        .map(|name| {
            schema.index(name).ok_or_else(|| {
                DynamoDBError::validation(format!(
                    "The table does not have the specified index: {name}"
                ))
            })
        })
        .transpose()
}

/// Reject strongly consistent reads on a global index.
pub(crate) fn check_consistent_read(
    index: Option<&IndexSchema>,
    consistent_read: Option<bool>,
) -> Result<(), DynamoDBError> {
    match index {
        Some(index) if index.kind == IndexKind::Global && consistent_read == Some(true) => Err(
            DynamoDBError::validation("Consistent reads are not supported on global secondary indexes"),
        ),
        _ => Ok(()),
    }
}

fn key_mismatch() -> DynamoDBError {
    DynamoDBError::validation("The provided key element does not match the schema")
}

/// Validate `ExclusiveStartKey` and return its position in the view.
///
/// An absent or empty key means "from the beginning".
pub(crate) fn start_position(
    schema: &TableSchema,
    index: Option<&IndexSchema>,
    start_key: Option<&Item>,
) -> Result<Option<ItemPosition>, DynamoDBError> {
    let Some(start_key) = start_key.filter(|key| !key.is_empty()) else {
        return Ok(None);
    };

    let mut names: Vec<&String> = start_key.keys().collect();
    names.sort();
    for name in names {
        validate_attribute_value(&start_key[name]).map_err(|err| {
            DynamoDBError::validation(format!(
                "The provided starting key is invalid: {}",
                err.message
            ))
        })?;
    }

    let view_keys = schema.view_keys(index);
    if start_key.len() != view_keys.len()
        || view_keys.iter().any(|k| !start_key.contains_key(&k.name))
    {
        return Err(key_mismatch());
    }
    position_of(schema, index, start_key)
        .map(Some)
        .map_err(|_| key_mismatch())
}

#[cfg(test)]
mod tests {
    use dynalocal_model::types::{Projection, ProjectionType, ScalarAttributeType};

    use super::*;
    use crate::schema::{KeyAttribute, KeySchema};

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn schema() -> TableSchema {
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
                sort_key: None,
            },
            projection: Projection {
                projection_type: Some(ProjectionType::KeysOnly),
                non_key_attributes: Vec::new(),
            },
        })
    }

    #[test]
    fn test_should_aggregate_field_constraints_in_order() {
        let mut errors = ValidationErrors::new();
        check_table_name(&mut errors, "a!");
        check_index_name(&mut errors, None);
        check_limit(&mut errors, Some(0));
        check_segment_ranges(&mut errors, Some(-1), Some(0));
        let err = errors.into_result().unwrap_err();
        assert_eq!(
            err.message,
            "5 validation errors detected: \
             Value 'a!' at 'tableName' failed to satisfy constraint: Member must have length \
             greater than or equal to 3; \
             Value 'a!' at 'tableName' failed to satisfy constraint: Member must satisfy regular \
             expression pattern: [a-zA-Z0-9_.-]+; \
             Value '0' at 'limit' failed to satisfy constraint: Member must have value greater \
             than or equal to 1; \
             Value '0' at 'totalSegments' failed to satisfy constraint: Member must have value \
             greater than or equal to 1; \
             Value '-1' at 'segment' failed to satisfy constraint: Member must have value \
             greater than or equal to 0"
        );
    }

    #[test]
    fn test_should_pair_segments() {
        assert_eq!(resolve_segments(None, None).unwrap(), (0, 1));
        assert_eq!(resolve_segments(Some(2), Some(4)).unwrap(), (2, 4));
        let err = resolve_segments(Some(4), Some(4)).unwrap_err();
        assert_eq!(
            err.message,
            "The Segment parameter is zero-indexed and must be less than parameter \
             TotalSegments. Segment: 4, TotalSegments: 4"
        );
        assert!(resolve_segments(Some(0), None).unwrap_err().message.starts_with(
            "The TotalSegments parameter is required"
        ));
        assert!(resolve_segments(None, Some(2)).unwrap_err().message.starts_with(
            "The Segment parameter is required"
        ));
    }

    #[test]
    fn test_should_reject_mixed_parameters() {
        assert!(check_not_mixed(&["ScanFilter"], &[]).is_ok());
        let err = check_not_mixed(&["ScanFilter"], &["FilterExpression", "ProjectionExpression"])
            .unwrap_err();
        assert_eq!(
            err.message,
            "Can not use both expression and non-expression parameters in the same request: \
             Non-expression parameters: {ScanFilter} Expression parameters: {FilterExpression, \
             ProjectionExpression}"
        );
    }

    #[test]
    fn test_should_validate_select_combinations() {
        assert!(validate_select(Some(Select::Count), false, false).is_ok());
        let err = validate_select(Some(Select::SpecificAttributes), false, false).unwrap_err();
        assert!(err.message.starts_with("SPECIFIC_ATTRIBUTES requires"));
        let err = validate_select(Some(Select::Count), true, false).unwrap_err();
        assert_eq!(
            err.message,
            "Cannot specify the ProjectionExpression when choosing to get COUNT results"
        );
    }

    #[test]
    fn test_should_resolve_select_defaults_per_view() {
        let table = schema();
        let index = table.index("by_album");
        assert_eq!(resolve_select(None, None, false).unwrap(), Select::AllAttributes);
        assert_eq!(
            resolve_select(None, index, false).unwrap(),
            Select::AllProjectedAttributes
        );
        assert_eq!(
            resolve_select(None, index, true).unwrap(),
            Select::SpecificAttributes
        );
        assert!(resolve_select(Some(Select::AllProjectedAttributes), None, false).is_err());
        let err = resolve_select(Some(Select::AllAttributes), index, false).unwrap_err();
        assert!(err.message.contains("global secondary index by_album"));
    }

    #[test]
    fn test_should_wrap_expression_errors_with_parameter() {
        let mut usage = Usage::default();
        let empty = HashMap::new();
        let err = prepare_condition("FilterExpression", " ", &empty, &HashMap::new(), 4096, &mut usage)
            .unwrap_err();
        assert_eq!(err.message, "Invalid FilterExpression: The expression can not be empty;");

        let err = prepare_projection("a, b", &empty, 3, &mut usage).unwrap_err();
        assert_eq!(
            err.message,
            "Invalid ProjectionExpression: Expression size has exceeded the maximum allowed \
             size; expression size: 4"
        );
    }

    #[test]
    fn test_should_reject_consistent_read_on_global_index() {
        let table = schema();
        assert!(check_consistent_read(None, Some(true)).is_ok());
        assert!(check_consistent_read(table.index("by_album"), Some(false)).is_ok());
        let err = check_consistent_read(table.index("by_album"), Some(true)).unwrap_err();
        assert_eq!(
            err.message,
            "Consistent reads are not supported on global secondary indexes"
        );
    }

    #[test]
    fn test_should_validate_start_key_shape() {
        let table = schema();
        let key = make_item(&[("artist", s("a")), ("song", s("x"))]);
        assert!(start_position(&table, None, Some(&key)).unwrap().is_some());
        assert!(start_position(&table, None, Some(&Item::new())).unwrap().is_none());

        let err = start_position(&table, table.index("by_album"), Some(&key)).unwrap_err();
        assert_eq!(err.message, "The provided key element does not match the schema");

        let bad = make_item(&[("artist", s("")), ("song", s("x"))]);
        let err = start_position(&table, None, Some(&bad)).unwrap_err();
        assert_eq!(
            err.message,
            "The provided starting key is invalid: One or more parameter values were invalid: \
             An AttributeValue may not contain an empty string"
        );

        let wrong_type = make_item(&[("artist", AttributeValue::N("1".to_owned())), ("song", s("x"))]);
        assert!(start_position(&table, None, Some(&wrong_type)).is_err());
    }
}
