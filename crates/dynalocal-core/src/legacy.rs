//! Compiler for the legacy condition parameters.
//!
//! `ScanFilter`, `QueryFilter` and `Expected` are compiled into the same
//! [`Expr`] AST the expression parser produces, with synthetic `:legacyN`
//! value placeholders. Attribute names are used literally and never parsed,
//! so a legacy name may contain characters an expression path could not.
//! `KeyConditions` compiles straight into a [`KeyCondition`].

use std::collections::HashMap;

use dynalocal_model::types::{
    ComparisonOperator, Condition, ConditionalOperator, ExpectedAttributeValue,
};
use dynalocal_model::validate::INVALID_PARAMETER_PREFIX;
use dynalocal_model::{AttributeValue, DynamoDBError, validate_attribute_value};

use crate::expression::ast::{
    AttributePath, CompareOp, Expr, FunctionCall, LogicalOp, Operand,
};
use crate::key_condition::{KeyCondition, SortCondition, missed_key_element};
use crate::schema::KeySchema;

/// A legacy filter compiled to an expression plus its synthetic values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    /// The compiled condition.
    pub expr: Expr,
    /// Values for the synthetic `:legacyN` placeholders in `expr`.
    pub values: HashMap<String, AttributeValue>,
}

fn invalid(message: &str) -> DynamoDBError {
    DynamoDBError::validation(format!("{INVALID_PARAMETER_PREFIX}{message}"))
}

/// Allocates synthetic value placeholders.
#[derive(Debug, Default)]
struct ValueSlots {
    values: HashMap<String, AttributeValue>,
}

impl ValueSlots {
    fn bind(&mut self, value: &AttributeValue) -> Operand {
        let name = format!(":legacy{}", self.values.len());
        self.values.insert(name.clone(), value.clone());
        Operand::Value(name)
    }
}

/// Compile a `ScanFilter` or `QueryFilter` map.
///
/// Conditions are joined with `AND` unless `conditional_operator` is `OR`,
/// in sorted attribute order. Returns `None` for an empty map.
///
/// # Errors
///
/// Returns a validation error if a condition has an invalid member, the wrong
/// number of members, or member types its operator does not accept.
#[allow(clippy::implicit_hasher)]
pub fn compile_conditions(
    conditions: &HashMap<String, Condition>,
    conditional_operator: Option<ConditionalOperator>,
) -> Result<Option<CompiledFilter>, DynamoDBError> {
    let mut names: Vec<&String> = conditions.keys().collect();
    names.sort();

    let mut slots = ValueSlots::default();
    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let condition = &conditions[name];
        validate_condition(condition.comparison_operator, &condition.attribute_value_list)?;
        parts.push(compile_one(
            name,
            condition.comparison_operator,
            &condition.attribute_value_list,
            &mut slots,
        ));
    }

    Ok(fold(parts, conditional_operator).map(|expr| CompiledFilter {
        expr,
        values: slots.values,
    }))
}

/// Compile a legacy `Expected` map.
///
/// Entries use either the `Value`/`Exists` form or the
/// `ComparisonOperator`/`AttributeValueList` form.
///
/// # Errors
///
/// Returns a validation error for entries mixing both forms, entries with
/// neither, `Exists: true` without a value, `Exists: false` with one, a
/// `ConditionalOperator` without entries, and any condition error reported
/// by [`compile_conditions`].
#[allow(clippy::implicit_hasher)]
pub fn compile_expected(
    expected: &HashMap<String, ExpectedAttributeValue>,
    conditional_operator: Option<ConditionalOperator>,
) -> Result<Option<CompiledFilter>, DynamoDBError> {
    if conditional_operator.is_some() && expected.is_empty() {
        return Err(DynamoDBError::validation(
            "ConditionalOperator cannot be used without Expected or with an empty Expected map",
        ));
    }

    let mut names: Vec<&String> = expected.keys().collect();
    names.sort();

    let mut slots = ValueSlots::default();
    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let entry = &expected[name];
        let part = match (entry.comparison_operator, &entry.value, entry.exists) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(invalid(&format!(
                    "Value or Exists cannot be used with ComparisonOperator for attribute \
                     ({name})"
                )));
            }
            (Some(op), None, None) => {
                validate_condition(op, &entry.attribute_value_list)?;
                compile_one(name, op, &entry.attribute_value_list, &mut slots)
            }
            (None, None, None) => {
                return Err(invalid(&format!(
                    "Value or ComparisonOperator must be used in Expected for attribute ({name})"
                )));
            }
            (None, None, Some(true)) => {
                return Err(invalid(&format!(
                    "Exists is set to TRUE for attribute ({name}), Value must also be set"
                )));
            }
            (None, Some(_), Some(false)) => {
                return Err(invalid(&format!(
                    "Value cannot be used when Exists is set to FALSE for attribute ({name})"
                )));
            }
            (None, None, Some(false)) => function("attribute_not_exists", vec![path(name)]),
            (None, Some(value), _) => {
                validate_attribute_value(value)?;
                Expr::Compare {
                    left: Box::new(path(name)),
                    op: CompareOp::Eq,
                    right: Box::new(slots.bind(value)),
                }
            }
        };
        parts.push(part);
    }

    Ok(fold(parts, conditional_operator).map(|expr| CompiledFilter {
        expr,
        values: slots.values,
    }))
}

/// Compile legacy `KeyConditions` for a Query on a view keyed by `schema`.
///
/// # Errors
///
/// Returns a validation error for more than two conditions, a missing
/// partition key condition, a non-key attribute, an operator the key cannot
/// be searched by, or values whose type does not match the key.
#[allow(clippy::implicit_hasher)]
pub fn compile_key_conditions(
    conditions: &HashMap<String, Condition>,
    schema: &KeySchema,
) -> Result<KeyCondition, DynamoDBError> {
    if conditions.is_empty() || conditions.len() > 2 {
        return Err(DynamoDBError::validation(
            "Conditions can be of length 1 or 2 only",
        ));
    }

    let mut names: Vec<&String> = conditions.keys().collect();
    names.sort();

    let mut partition = None;
    let mut sort = None;
    for name in names {
        let condition = &conditions[name];
        let op = condition.comparison_operator;
        let list = &condition.attribute_value_list;
        validate_condition(op, list)?;

        if *name == schema.partition_key.name {
            if op != ComparisonOperator::Eq {
                return Err(not_indexable());
            }
            partition = list.first().cloned();
        } else if schema.sort_key.as_ref().is_some_and(|sk| sk.name == *name) {
            sort = Some(sort_condition(op, list)?);
        } else {
            return Err(missed_key_element(schema));
        }
    }

    let partition = partition.ok_or_else(|| missed_key_element(schema))?;
    let condition = KeyCondition { partition, sort };
    condition.check_types(schema)?;
    Ok(condition)
}

fn not_indexable() -> DynamoDBError {
    DynamoDBError::validation("Attempted conditional constraint is not an indexable operation")
}

fn sort_condition(
    op: ComparisonOperator,
    list: &[AttributeValue],
) -> Result<SortCondition, DynamoDBError> {
    let first = list.first().cloned().ok_or_else(not_indexable)?;
    let ordered = |op: CompareOp| Ok(SortCondition::Compare(op, first.clone()));
    match op {
        ComparisonOperator::Eq => ordered(CompareOp::Eq),
        ComparisonOperator::Lt => ordered(CompareOp::Lt),
        ComparisonOperator::Le => ordered(CompareOp::Le),
        ComparisonOperator::Gt => ordered(CompareOp::Gt),
        ComparisonOperator::Ge => ordered(CompareOp::Ge),
        ComparisonOperator::BeginsWith => Ok(SortCondition::BeginsWith(first.clone())),
        ComparisonOperator::Between => match list {
            [low, high] => Ok(SortCondition::Between(low.clone(), high.clone())),
            _ => Err(not_indexable()),
        },
        _ => Err(not_indexable()),
    }
}

/// Validate one condition's members, arity and member types, in that order.
fn validate_condition(
    op: ComparisonOperator,
    list: &[AttributeValue],
) -> Result<(), DynamoDBError> {
    for value in list {
        validate_attribute_value(value)?;
    }

    let arity_ok = match op {
        ComparisonOperator::Null | ComparisonOperator::NotNull => list.is_empty(),
        ComparisonOperator::Between => list.len() == 2,
        ComparisonOperator::In => !list.is_empty(),
        _ => list.len() == 1,
    };
    if !arity_ok {
        return Err(invalid(&format!(
            "Invalid number of argument(s) for the {op} ComparisonOperator"
        )));
    }

    let accepted = |descriptor: &str| match op {
        ComparisonOperator::Lt
        | ComparisonOperator::Le
        | ComparisonOperator::Gt
        | ComparisonOperator::Ge
        | ComparisonOperator::Between
        | ComparisonOperator::In => matches!(descriptor, "S" | "N" | "B"),
        ComparisonOperator::Contains | ComparisonOperator::NotContains => {
            !matches!(descriptor, "SS" | "NS" | "BS" | "M" | "L")
        }
        ComparisonOperator::BeginsWith => matches!(descriptor, "S" | "B"),
        _ => true,
    };
    if let Some(value) = list.iter().find(|v| !accepted(v.type_descriptor())) {
        return Err(invalid(&format!(
            "ComparisonOperator {op} is not valid for {} AttributeValue type",
            value.type_descriptor()
        )));
    }

    if matches!(op, ComparisonOperator::Between | ComparisonOperator::In) {
        if let Some((first, rest)) = list.split_first() {
            if rest
                .iter()
                .any(|v| v.type_descriptor() != first.type_descriptor())
            {
                return Err(invalid(
                    "AttributeValues inside AttributeValueList must be of same type",
                ));
            }
        }
    }
    Ok(())
}

fn path(name: &str) -> Operand {
    Operand::Path(AttributePath::attribute(name))
}

fn function(name: &str, args: Vec<Operand>) -> Expr {
    Expr::Function(FunctionCall {
        name: name.to_owned(),
        args,
    })
}

fn compare(name: &str, op: CompareOp, value: &AttributeValue, slots: &mut ValueSlots) -> Expr {
    Expr::Compare {
        left: Box::new(path(name)),
        op,
        right: Box::new(slots.bind(value)),
    }
}

/// Build the expression for one validated condition.
fn compile_one(
    name: &str,
    op: ComparisonOperator,
    list: &[AttributeValue],
    slots: &mut ValueSlots,
) -> Expr {
    // Arity is already validated; the fallback arm only sees NULL.
    match (op, list) {
        (ComparisonOperator::Eq, [v]) => compare(name, CompareOp::Eq, v, slots),
        (ComparisonOperator::Ne, [v]) => compare(name, CompareOp::Ne, v, slots),
        (ComparisonOperator::Lt, [v]) => compare(name, CompareOp::Lt, v, slots),
        (ComparisonOperator::Le, [v]) => compare(name, CompareOp::Le, v, slots),
        (ComparisonOperator::Gt, [v]) => compare(name, CompareOp::Gt, v, slots),
        (ComparisonOperator::Ge, [v]) => compare(name, CompareOp::Ge, v, slots),
        (ComparisonOperator::Contains, [v]) => {
            function("contains", vec![path(name), slots.bind(v)])
        }
        (ComparisonOperator::NotContains, [v]) => Expr::Logical {
            op: LogicalOp::And,
            left: Box::new(function("attribute_exists", vec![path(name)])),
            right: Box::new(Expr::Not(Box::new(function(
                "contains",
                vec![path(name), slots.bind(v)],
            )))),
        },
        (ComparisonOperator::BeginsWith, [v]) => {
            function("begins_with", vec![path(name), slots.bind(v)])
        }
        (ComparisonOperator::Between, [low, high]) => Expr::Between {
            value: Box::new(path(name)),
            low: Box::new(slots.bind(low)),
            high: Box::new(slots.bind(high)),
        },
        (ComparisonOperator::In, candidates) => Expr::In {
            value: Box::new(path(name)),
            list: candidates.iter().map(|v| slots.bind(v)).collect(),
        },
        (ComparisonOperator::NotNull, _) => function("attribute_exists", vec![path(name)]),
        _ => function("attribute_not_exists", vec![path(name)]),
    }
}

fn fold(parts: Vec<Expr>, conditional_operator: Option<ConditionalOperator>) -> Option<Expr> {
    let op = match conditional_operator {
        Some(ConditionalOperator::Or) => LogicalOp::Or,
        _ => LogicalOp::And,
    };
    parts.into_iter().reduce(|left, right| Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

#[cfg(test)]
mod tests {
    use dynalocal_model::types::ScalarAttributeType;

    use super::*;
    use crate::expression::EvalContext;
    use crate::schema::KeyAttribute;

    fn make_item(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn n(v: &str) -> AttributeValue {
        AttributeValue::N(v.to_owned())
    }

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn cond(op: ComparisonOperator, list: Vec<AttributeValue>) -> Condition {
        Condition {
            comparison_operator: op,
            attribute_value_list: list,
        }
    }

    fn matches(filter: &CompiledFilter, item: &HashMap<String, AttributeValue>) -> bool {
        let names = HashMap::new();
        EvalContext {
            item,
            names: &names,
            values: &filter.values,
        }
        .evaluate(&filter.expr)
        .unwrap()
    }

    #[test]
    fn test_should_compile_between_scan_filter() {
        let conditions = HashMap::from([(
            "a".to_owned(),
            cond(ComparisonOperator::Between, vec![n("1"), n("5")]),
        )]);
        let filter = compile_conditions(&conditions, None).unwrap().unwrap();
        assert!(matches(&filter, &make_item(&[("a", n("1"))])));
        assert!(matches(&filter, &make_item(&[("a", n("5"))])));
        assert!(!matches(&filter, &make_item(&[("a", n("6"))])));
        assert!(!matches(&filter, &make_item(&[("b", n("3"))])));
    }

    #[test]
    fn test_should_return_none_for_empty_filter() {
        assert!(compile_conditions(&HashMap::new(), None).unwrap().is_none());
    }

    #[test]
    fn test_should_join_with_or_in_sorted_order() {
        let conditions = HashMap::from([
            ("b".to_owned(), cond(ComparisonOperator::Eq, vec![s("x")])),
            ("a".to_owned(), cond(ComparisonOperator::Null, vec![])),
        ]);
        let filter = compile_conditions(&conditions, Some(ConditionalOperator::Or))
            .unwrap()
            .unwrap();
        let Expr::Logical { op, left, .. } = &filter.expr else {
            panic!("expected a logical expression");
        };
        assert_eq!(*op, LogicalOp::Or);
        assert_eq!(**left, function("attribute_not_exists", vec![path("a")]));
        assert!(matches(&filter, &make_item(&[("b", s("y"))])));
        assert!(!matches(&filter, &make_item(&[("a", s("1")), ("b", s("y"))])));
    }

    #[test]
    fn test_should_use_attribute_names_literally() {
        let conditions = HashMap::from([(
            "weird.name[0]".to_owned(),
            cond(ComparisonOperator::Eq, vec![s("x")]),
        )]);
        let filter = compile_conditions(&conditions, None).unwrap().unwrap();
        assert!(matches(&filter, &make_item(&[("weird.name[0]", s("x"))])));
    }

    #[test]
    fn test_should_require_existing_attribute_for_not_contains() {
        let conditions = HashMap::from([(
            "tags".to_owned(),
            cond(ComparisonOperator::NotContains, vec![s("red")]),
        )]);
        let filter = compile_conditions(&conditions, None).unwrap().unwrap();
        assert!(!matches(&filter, &make_item(&[])));
        assert!(matches(
            &filter,
            &make_item(&[("tags", AttributeValue::Ss(vec!["blue".to_owned()]))])
        ));
    }

    #[test]
    fn test_should_reject_wrong_arity() {
        let conditions = HashMap::from([(
            "a".to_owned(),
            cond(ComparisonOperator::Between, vec![n("1")]),
        )]);
        let err = compile_conditions(&conditions, None).unwrap_err();
        assert_eq!(
            err.message,
            "One or more parameter values were invalid: Invalid number of argument(s) for the \
             BETWEEN ComparisonOperator"
        );

        let conditions =
            HashMap::from([("a".to_owned(), cond(ComparisonOperator::NotNull, vec![n("1")]))]);
        assert!(compile_conditions(&conditions, None).is_err());
    }

    #[test]
    fn test_should_reject_wrong_types() {
        let cases = [
            (ComparisonOperator::Lt, AttributeValue::Bool(true), "LT", "BOOL"),
            (ComparisonOperator::BeginsWith, n("1"), "BEGINS_WITH", "N"),
            (
                ComparisonOperator::Contains,
                AttributeValue::L(vec![]),
                "CONTAINS",
                "L",
            ),
        ];
        for (op, value, op_name, type_name) in cases {
            let conditions = HashMap::from([("a".to_owned(), cond(op, vec![value]))]);
            let err = compile_conditions(&conditions, None).unwrap_err();
            assert_eq!(
                err.message,
                format!(
                    "One or more parameter values were invalid: ComparisonOperator {op_name} is \
                     not valid for {type_name} AttributeValue type"
                )
            );
        }
    }

    #[test]
    fn test_should_reject_mixed_member_types() {
        let conditions = HashMap::from([(
            "a".to_owned(),
            cond(ComparisonOperator::In, vec![n("1"), s("1")]),
        )]);
        let err = compile_conditions(&conditions, None).unwrap_err();
        assert_eq!(
            err.message,
            "One or more parameter values were invalid: AttributeValues inside \
             AttributeValueList must be of same type"
        );
    }

    #[test]
    fn test_should_validate_members_before_arity() {
        let conditions = HashMap::from([(
            "a".to_owned(),
            cond(
                ComparisonOperator::Eq,
                vec![
                    AttributeValue::Ss(vec!["a".to_owned(), "a".to_owned()]),
                    s("b"),
                ],
            ),
        )]);
        let err = compile_conditions(&conditions, None).unwrap_err();
        assert_eq!(
            err.message,
            "One or more parameter values were invalid: Input collection [a, a] contains \
             duplicates."
        );
    }

    #[test]
    fn test_should_compile_expected_forms() {
        let expected = HashMap::from([
            (
                "a".to_owned(),
                ExpectedAttributeValue {
                    value: Some(s("x")),
                    ..Default::default()
                },
            ),
            (
                "b".to_owned(),
                ExpectedAttributeValue {
                    exists: Some(false),
                    ..Default::default()
                },
            ),
            (
                "c".to_owned(),
                ExpectedAttributeValue {
                    comparison_operator: Some(ComparisonOperator::Gt),
                    attribute_value_list: vec![n("10")],
                    ..Default::default()
                },
            ),
        ]);
        let filter = compile_expected(&expected, None).unwrap().unwrap();
        assert!(matches(&filter, &make_item(&[("a", s("x")), ("c", n("11"))])));
        assert!(!matches(
            &filter,
            &make_item(&[("a", s("x")), ("b", s("y")), ("c", n("11"))])
        ));
    }

    #[test]
    fn test_should_reject_invalid_expected_entries() {
        let cases = [
            (
                ExpectedAttributeValue {
                    exists: Some(true),
                    ..Default::default()
                },
                "Exists is set to TRUE for attribute (a), Value must also be set",
            ),
            (
                ExpectedAttributeValue::default(),
                "Value or ComparisonOperator must be used in Expected for attribute (a)",
            ),
            (
                ExpectedAttributeValue {
                    value: Some(s("x")),
                    exists: Some(false),
                    ..Default::default()
                },
                "Value cannot be used when Exists is set to FALSE for attribute (a)",
            ),
            (
                ExpectedAttributeValue {
                    value: Some(s("x")),
                    comparison_operator: Some(ComparisonOperator::Eq),
                    ..Default::default()
                },
                "Value or Exists cannot be used with ComparisonOperator for attribute (a)",
            ),
        ];
        for (entry, message) in cases {
            let expected = HashMap::from([("a".to_owned(), entry)]);
            let err = compile_expected(&expected, None).unwrap_err();
            assert_eq!(err.message, format!("{INVALID_PARAMETER_PREFIX}{message}"));
        }

        let err = compile_expected(&HashMap::new(), Some(ConditionalOperator::And)).unwrap_err();
        assert!(err.message.starts_with("ConditionalOperator cannot be used"));
    }

    fn key_schema() -> KeySchema {
        KeySchema {
            partition_key: KeyAttribute::new("pk", ScalarAttributeType::S),
            sort_key: Some(KeyAttribute::new("sk", ScalarAttributeType::N)),
        }
    }

    #[test]
    fn test_should_compile_key_conditions() {
        let conditions = HashMap::from([
            ("pk".to_owned(), cond(ComparisonOperator::Eq, vec![s("a")])),
            (
                "sk".to_owned(),
                cond(ComparisonOperator::Between, vec![n("1"), n("3")]),
            ),
        ]);
        let key = compile_key_conditions(&conditions, &key_schema()).unwrap();
        assert_eq!(key.partition, s("a"));
        assert_eq!(key.sort, Some(SortCondition::Between(n("1"), n("3"))));
    }

    #[test]
    fn test_should_reject_non_indexable_key_conditions() {
        let schema = key_schema();
        let conditions = HashMap::from([(
            "pk".to_owned(),
            cond(ComparisonOperator::Ne, vec![s("a")]),
        )]);
        let err = compile_key_conditions(&conditions, &schema).unwrap_err();
        assert_eq!(
            err.message,
            "Attempted conditional constraint is not an indexable operation"
        );

        let conditions = HashMap::from([(
            "sk".to_owned(),
            cond(ComparisonOperator::Eq, vec![n("1")]),
        )]);
        let err = compile_key_conditions(&conditions, &schema).unwrap_err();
        assert_eq!(err.message, "Query condition missed key schema element: pk");

        let conditions = HashMap::from([
            ("pk".to_owned(), cond(ComparisonOperator::Eq, vec![s("a")])),
            ("sk".to_owned(), cond(ComparisonOperator::Eq, vec![n("1")])),
            ("x".to_owned(), cond(ComparisonOperator::Eq, vec![n("1")])),
        ]);
        let err = compile_key_conditions(&conditions, &schema).unwrap_err();
        assert_eq!(err.message, "Conditions can be of length 1 or 2 only");
    }

    #[test]
    fn test_should_report_first_invalid_key_condition_by_name() {
        for _ in 0..32 {
            let conditions = HashMap::from([
                ("sk".to_owned(), cond(ComparisonOperator::Between, vec![n("1")])),
                ("pk".to_owned(), cond(ComparisonOperator::Ne, vec![s("a")])),
            ]);
            let err = compile_key_conditions(&conditions, &key_schema()).unwrap_err();
            assert_eq!(
                err.message,
                "Attempted conditional constraint is not an indexable operation"
            );
        }
    }
}
