//! `Query`.

use std::collections::HashMap;

use dynalocal_model::input::QueryInput;
use dynalocal_model::output::QueryOutput;
use dynalocal_model::types::Select;
use dynalocal_model::{DynamoDBError, ValidationErrors};
use tracing::debug;

use super::request::{
    attributes_to_get, check_consistent_read, check_index_name, check_limit, check_not_mixed,
    check_table_name, prepare_condition, prepare_projection, resolve_index, resolve_select,
    start_position, validate_select,
};
use super::{Executor, PagePlan, clamp_count, consumed_capacity, log_page};
use crate::error::storage_error_to_dynamodb;
use crate::expression::analysis::top_level_names;
use crate::expression::placeholders::{ExpressionSite, check_names, check_unused, check_values};
use crate::expression::{Expr, Usage};
use crate::key_condition::{KeyCondition, extract_key_condition};
use crate::legacy::{compile_conditions, compile_key_conditions};
use crate::schema::KeySchema;
use crate::storage::{ItemPosition, KeyValue, TableCatalog};

fn missing_key_condition() -> DynamoDBError {
    DynamoDBError::validation(
        "Either the KeyConditions or KeyConditionExpression parameter must be specified in the \
         request.",
    )
}

fn key_attribute_in_filter(parameter: &str, name: &str) -> DynamoDBError {
    DynamoDBError::validation(format!(
        "{parameter} can only contain non-primary key attributes: Primary key attribute: {name}"
    ))
}

fn check_filter_names<'n>(
    parameter: &str,
    key_schema: &KeySchema,
    names: impl IntoIterator<Item = &'n str>,
) -> Result<(), DynamoDBError> {
    match names
        .into_iter()
        .find(|name| key_schema.is_key_attribute(name))
    {
        Some(name) => Err(key_attribute_in_filter(parameter, name)),
        None => Ok(()),
    }
}

/// The start key must lie in the queried partition.
fn check_start_partition(
    start: &ItemPosition,
    key_schema: &KeySchema,
    key: &KeyCondition,
) -> Result<(), DynamoDBError> {
    let queried = KeyValue::from_attribute_value(&key_schema.partition_key.name, &key.partition)
        .map_err(storage_error_to_dynamodb)?;
    if start.partition() == Some(&queried) {
        Ok(())
    } else {
        Err(DynamoDBError::validation(
            "The provided starting key is invalid: The provided key element does not match the \
             schema",
        ))
    }
}

impl Executor {
    /// Execute a `Query`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` for any invalid parameter or key
    /// condition, and a `ResourceNotFoundException` for an unknown table.
    #[allow(clippy::needless_pass_by_value, clippy::too_many_lines)]
    pub fn execute_query(
        &self,
        catalog: &dyn TableCatalog,
        input: QueryInput,
    ) -> Result<QueryOutput, DynamoDBError> {
        let mut errors = ValidationErrors::new();
        check_table_name(&mut errors, &input.table_name);
        check_index_name(&mut errors, input.index_name.as_deref());
        check_limit(&mut errors, input.limit);
        errors.into_result()?;

        let mut legacy = Vec::new();
        if input.attributes_to_get.is_some() {
            legacy.push("AttributesToGet");
        }
        if input.key_conditions.is_some() {
            legacy.push("KeyConditions");
        }
        if input.query_filter.is_some() {
            legacy.push("QueryFilter");
        }
        if input.conditional_operator.is_some() {
            legacy.push("ConditionalOperator");
        }
        let mut expressions = Vec::new();
        if input.projection_expression.is_some() {
            expressions.push("ProjectionExpression");
        }
        if input.filter_expression.is_some() {
            expressions.push("FilterExpression");
        }
        if input.key_condition_expression.is_some() {
            expressions.push("KeyConditionExpression");
        }
        check_not_mixed(&legacy, &expressions)?;
        if input.key_condition_expression.is_none() && input.key_conditions.is_none() {
            return Err(missing_key_condition());
        }

        let names = input.expression_attribute_names.as_ref();
        let values = input.expression_attribute_values.as_ref();
        check_names(names, !expressions.is_empty())?;
        check_values(
            values,
            input.key_condition_expression.is_some() || input.filter_expression.is_some(),
            ExpressionSite::Query,
        )?;

        let legacy_projection = attributes_to_get(input.attributes_to_get.as_deref())?;
        let has_projection = input.projection_expression.is_some();
        validate_select(input.select, has_projection, legacy_projection.is_some())?;

        let empty_names = HashMap::new();
        let empty_values = HashMap::new();
        let names = names.unwrap_or(&empty_names);
        let request_values = values.unwrap_or(&empty_values);
        let max_bytes = self.config.max_expression_bytes;
        let mut usage = Usage::default();

        let key_expr = input
            .key_condition_expression
            .as_deref()
            .map(|text| {
                prepare_condition(
                    "KeyConditionExpression",
                    text,
                    names,
                    request_values,
                    max_bytes,
                    &mut usage,
                )
            })
            .transpose()?;
        let filter = input
            .filter_expression
            .as_deref()
            .map(|text| {
                prepare_condition(
                    "FilterExpression",
                    text,
                    names,
                    request_values,
                    max_bytes,
                    &mut usage,
                )
            })
            .transpose()?;
        let projection = match input.projection_expression.as_deref() {
            Some(text) => Some(prepare_projection(text, names, max_bytes, &mut usage)?),
            None => legacy_projection,
        };
        let compiled = input
            .query_filter
            .as_ref()
            .map(|conditions| compile_conditions(conditions, input.conditional_operator))
            .transpose()?
            .flatten();
        if self.config.strict_placeholders {
            check_unused(input.expression_attribute_names.as_ref(), values, &usage)?;
        }

        let table = catalog
            .table(&input.table_name)
            .ok_or_else(|| DynamoDBError::resource_not_found("Requested resource not found"))?;
        let schema = table.schema();
        let index = resolve_index(schema, input.index_name.as_deref())?;
        let view_keys = schema.view_key_schema(index);

        let key = match (&key_expr, &input.key_conditions) {
            (Some(expr), _) => extract_key_condition(expr, view_keys, names, request_values)?,
            (None, Some(conditions)) => compile_key_conditions(conditions, view_keys)?,
            (None, None) => return Err(missing_key_condition()),
        };
        if let Some(expr) = &filter {
            check_filter_names(
                "Filter Expression",
                view_keys,
                top_level_names(expr, names),
            )?;
        }
        if let Some(conditions) = &input.query_filter {
            let mut filtered: Vec<&str> = conditions.keys().map(String::as_str).collect();
            filtered.sort_unstable();
            check_filter_names("QueryFilter", view_keys, filtered)?;
        }

        let select = resolve_select(input.select, index, projection.is_some())?;
        check_consistent_read(index, input.consistent_read)?;

        let start = start_position(schema, index, input.exclusive_start_key.as_ref())?;
        if let Some(start) = &start {
            check_start_partition(start, view_keys, &key)?;
        }

        let (filter, filter_values): (Option<&Expr>, _) = match (&filter, &compiled) {
            (Some(expr), _) => (Some(expr), request_values),
            (None, Some(compiled)) => (Some(&compiled.expr), &compiled.values),
            (None, None) => (None, &empty_values),
        };
        let plan = PagePlan {
            schema,
            index,
            key: Some(&key),
            filter,
            names,
            values: filter_values,
            projection: projection.as_deref(),
            select,
            limit: input.limit.and_then(|l| usize::try_from(l).ok()),
            max_page_bytes: u64::try_from(self.config.max_page_bytes).unwrap_or(u64::MAX),
        };

        let forward = input.scan_index_forward.unwrap_or(true);
        debug!(
            table = %schema.name,
            index = input.index_name.as_deref(),
            partition = %key.partition,
            forward,
            resumed = start.is_some(),
            "query"
        );
        let items = table
            .partition(
                input.index_name.as_deref(),
                &key.partition,
                forward,
                start.as_ref(),
            )
            .map_err(storage_error_to_dynamodb)?;
        let page = plan.run(items)?;
        log_page("Query", schema, index, &page);

        let consumed_capacity = consumed_capacity(
            input.return_consumed_capacity.as_ref(),
            schema,
            index,
            page.bytes,
            input.consistent_read.unwrap_or(false),
        );
        Ok(QueryOutput {
            items: (select != Select::Count).then_some(page.items),
            count: clamp_count(page.count),
            scanned_count: clamp_count(page.scanned_count),
            last_evaluated_key: page.last_evaluated_key,
            consumed_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use dynalocal_model::types::{
        ComparisonOperator, Condition, Projection, ProjectionType, ReturnConsumedCapacity,
        ScalarAttributeType,
    };
    use dynalocal_model::{AttributeValue, DynamoDBErrorCode, Item};

    use super::*;
    use crate::schema::{IndexKind, IndexSchema, KeyAttribute, TableSchema};
    use crate::storage::MemoryCatalog;

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn make_values(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        make_item(pairs)
    }

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn n(v: &str) -> AttributeValue {
        AttributeValue::N(v.to_owned())
    }

    /// `music` keyed by `artist`/`track`, with a keys-only local index on
    /// `year`. `a1` has tracks 1..=10, `a2` has tracks 1..=3.
    fn make_catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        let schema = TableSchema::new(
            "music",
            KeySchema {
                partition_key: KeyAttribute::new("artist", ScalarAttributeType::S),
                sort_key: Some(KeyAttribute::new("track", ScalarAttributeType::N)),
            },
        )
        .with_index(IndexSchema {
            name: "by_year".to_owned(),
            kind: IndexKind::Local,
            key_schema: KeySchema {
                partition_key: KeyAttribute::new("artist", ScalarAttributeType::S),
                sort_key: Some(KeyAttribute::new("year", ScalarAttributeType::N)),
            },
            projection: Projection {
                projection_type: Some(ProjectionType::KeysOnly),
                non_key_attributes: Vec::new(),
            },
        });
        let table = catalog.create_table(schema);
        for (artist, tracks) in [("a1", 10), ("a2", 3)] {
            for track in 1..=tracks {
                table
                    .put_item(make_item(&[
                        ("artist", s(artist)),
                        ("track", n(&track.to_string())),
                        ("year", n(&(2000 + track).to_string())),
                        ("title", s(&format!("{artist}-t{track}"))),
                    ]))
                    .unwrap();
            }
        }
        catalog
    }

    fn query(key_condition: &str, values: &[(&str, AttributeValue)]) -> QueryInput {
        QueryInput {
            table_name: "music".to_owned(),
            key_condition_expression: Some(key_condition.to_owned()),
            expression_attribute_values: Some(make_values(values)),
            ..QueryInput::default()
        }
    }

    fn tracks(items: &[Item]) -> Vec<String> {
        items
            .iter()
            .map(|item| item["track"].as_n().unwrap_or_default().to_owned())
            .collect()
    }

    #[test]
    fn test_should_walk_partition_in_sort_order() {
        let catalog = make_catalog();
        let out = Executor::default()
            .execute_query(&catalog, query("artist = :a", &[(":a", s("a2"))]))
            .unwrap();
        assert_eq!(tracks(&out.items.unwrap()), ["1", "2", "3"]);
        assert_eq!(out.count, 3);
        assert_eq!(out.scanned_count, 3);
        assert!(out.last_evaluated_key.is_none());
    }

    #[test]
    fn test_should_walk_partition_in_reverse() {
        let catalog = make_catalog();
        let input = QueryInput {
            scan_index_forward: Some(false),
            ..query("artist = :a", &[(":a", s("a2"))])
        };
        let out = Executor::default().execute_query(&catalog, input).unwrap();
        assert_eq!(tracks(&out.items.unwrap()), ["3", "2", "1"]);
    }

    #[test]
    fn test_should_apply_sort_key_condition_before_counting() {
        let catalog = make_catalog();
        let input = QueryInput {
            limit: Some(2),
            ..query(
                "artist = :a AND track BETWEEN :lo AND :hi",
                &[(":a", s("a1")), (":lo", n("4")), (":hi", n("8"))],
            )
        };
        let out = Executor::default().execute_query(&catalog, input).unwrap();
        assert_eq!(tracks(&out.items.unwrap()), ["4", "5"]);
        assert_eq!(out.scanned_count, 2);
        let last = out.last_evaluated_key.unwrap();
        assert_eq!(last, make_item(&[("artist", s("a1")), ("track", n("5"))]));
    }

    #[test]
    fn test_should_paginate_in_both_directions() {
        let catalog = make_catalog();
        let executor = Executor::default();
        for forward in [true, false] {
            let mut seen = Vec::new();
            let mut start = None;
            loop {
                let input = QueryInput {
                    limit: Some(3),
                    scan_index_forward: Some(forward),
                    exclusive_start_key: start.take(),
                    ..query("artist = :a AND track > :t", &[(":a", s("a1")), (":t", n("2"))])
                };
                let out = executor.execute_query(&catalog, input).unwrap();
                seen.extend(tracks(&out.items.unwrap()));
                match out.last_evaluated_key {
                    Some(key) => start = Some(key),
                    None => break,
                }
            }
            let mut expected: Vec<String> = (3..=10).map(|t| t.to_string()).collect();
            if !forward {
                expected.reverse();
            }
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_should_filter_after_examining() {
        let catalog = make_catalog();
        let input = QueryInput {
            filter_expression: Some("begins_with(title, :p)".to_owned()),
            ..query("artist = :a", &[(":a", s("a1")), (":p", s("a1-t1"))])
        };
        let out = Executor::default().execute_query(&catalog, input).unwrap();
        assert_eq!(tracks(&out.items.unwrap()), ["1", "10"]);
        assert_eq!(out.count, 2);
        assert_eq!(out.scanned_count, 10);
    }

    #[test]
    fn test_should_accept_legacy_key_conditions_and_filter() {
        let catalog = make_catalog();
        let input = QueryInput {
            table_name: "music".to_owned(),
            key_conditions: Some(HashMap::from([
                (
                    "artist".to_owned(),
                    Condition {
                        comparison_operator: ComparisonOperator::Eq,
                        attribute_value_list: vec![s("a1")],
                    },
                ),
                (
                    "track".to_owned(),
                    Condition {
                        comparison_operator: ComparisonOperator::Le,
                        attribute_value_list: vec![n("5")],
                    },
                ),
            ])),
            query_filter: Some(HashMap::from([(
                "year".to_owned(),
                Condition {
                    comparison_operator: ComparisonOperator::Gt,
                    attribute_value_list: vec![n("2002")],
                },
            )])),
            ..QueryInput::default()
        };
        let out = Executor::default().execute_query(&catalog, input).unwrap();
        assert_eq!(tracks(&out.items.unwrap()), ["3", "4", "5"]);
        assert_eq!(out.scanned_count, 5);
    }

    #[test]
    fn test_should_query_local_index_with_projection_rules() {
        let catalog = make_catalog();
        let executor = Executor::default();
        let input = QueryInput {
            index_name: Some("by_year".to_owned()),
            return_consumed_capacity: Some(ReturnConsumedCapacity::Indexes),
            ..query("artist = :a AND #y >= :y", &[(":a", s("a1")), (":y", n("2009"))])
        };
        let input = QueryInput {
            expression_attribute_names: Some(HashMap::from([("#y".to_owned(), "year".to_owned())])),
            ..input
        };
        let out = executor.execute_query(&catalog, input.clone()).unwrap();
        let items = out.items.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| !item.contains_key("title")));
        let consumed = out.consumed_capacity.unwrap();
        assert!(consumed.local_secondary_indexes.contains_key("by_year"));

        let input = QueryInput {
            select: Some(Select::AllAttributes),
            ..input
        };
        let out = executor.execute_query(&catalog, input).unwrap();
        assert!(out.items.unwrap().iter().all(|item| item.contains_key("title")));
    }

    #[test]
    fn test_should_count_without_items() {
        let catalog = make_catalog();
        let input = QueryInput {
            select: Some(Select::Count),
            ..query("artist = :a", &[(":a", s("a1"))])
        };
        let out = Executor::default().execute_query(&catalog, input).unwrap();
        assert!(out.items.is_none());
        assert_eq!(out.count, 10);
    }

    #[test]
    fn test_should_report_query_validation_errors() {
        let catalog = make_catalog();
        let cases: Vec<(QueryInput, &str)> = vec![
            (
                QueryInput {
                    table_name: "music".to_owned(),
                    ..QueryInput::default()
                },
                "Either the KeyConditions or KeyConditionExpression parameter must be specified \
                 in the request.",
            ),
            (
                query("track = :t", &[(":t", n("1"))]),
                "Query condition missed key schema element: artist",
            ),
            (
                query("artist = :a OR artist = :b", &[(":a", s("a1")), (":b", s("a2"))]),
                "Unsupported operator in KeyConditionExpression: OR",
            ),
            (
                query("artist = :a", &[(":a", n("1"))]),
                "Condition parameter type does not match schema type for key attribute 'artist'",
            ),
            (
                QueryInput {
                    filter_expression: Some("track > :t".to_owned()),
                    ..query("artist = :a", &[(":a", s("a1")), (":t", n("1"))])
                },
                "Filter Expression can only contain non-primary key attributes: Primary key \
                 attribute: track",
            ),
            (
                QueryInput {
                    key_conditions: Some(HashMap::from([(
                        "artist".to_owned(),
                        Condition {
                            comparison_operator: ComparisonOperator::Eq,
                            attribute_value_list: vec![s("a1")],
                        },
                    )])),
                    query_filter: Some(HashMap::from([(
                        "artist".to_owned(),
                        Condition {
                            comparison_operator: ComparisonOperator::NotNull,
                            attribute_value_list: Vec::new(),
                        },
                    )])),
                    table_name: "music".to_owned(),
                    ..QueryInput::default()
                },
                "QueryFilter can only contain non-primary key attributes: Primary key attribute: \
                 artist",
            ),
            (
                QueryInput {
                    exclusive_start_key: Some(make_item(&[("artist", s("a2")), ("track", n("1"))])),
                    ..query("artist = :a", &[(":a", s("a1"))])
                },
                "The provided starting key is invalid: The provided key element does not match \
                 the schema",
            ),
            (
                QueryInput {
                    select: Some(Select::AllProjectedAttributes),
                    ..query("artist = :a", &[(":a", s("a1"))])
                },
                "ALL_PROJECTED_ATTRIBUTES is only supported for queries on secondary indexes",
            ),
            (
                QueryInput {
                    key_conditions: Some(HashMap::new()),
                    ..query("artist = :a", &[(":a", s("a1"))])
                },
                "Can not use both expression and non-expression parameters in the same request: \
                 Non-expression parameters: {KeyConditions} Expression parameters: \
                 {KeyConditionExpression}",
            ),
        ];
        for (input, message) in cases {
            let err = Executor::default().execute_query(&catalog, input).unwrap_err();
            assert_eq!(err.message, message);
            assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
        }
    }

    #[test]
    fn test_should_report_missing_table() {
        let catalog = make_catalog();
        let input = QueryInput {
            table_name: "nothing".to_owned(),
            ..query("artist = :a", &[(":a", s("a1"))])
        };
        let err = Executor::default().execute_query(&catalog, input).unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ResourceNotFoundException);
    }
}
