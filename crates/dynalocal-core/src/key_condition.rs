//! Query key conditions.
//!
//! A key condition pins one partition and optionally restricts the sort key.
//! It comes either from a `KeyConditionExpression` (extracted here from the
//! analyzed AST) or from legacy `KeyConditions` (see
//! [`crate::legacy::compile_key_conditions`]).

use std::cmp::Ordering;
use std::collections::HashMap;

use dynalocal_model::{AttributeValue, DynamoDBError};

use crate::comparator::{compare, equals};
use crate::expression::ast::{CompareOp, Expr, FunctionName, LogicalOp, Operand, PathElement};
use crate::schema::{KeyAttribute, KeySchema};

/// Restriction on the sort key of a queried partition.
#[derive(Debug, Clone, PartialEq)]
pub enum SortCondition {
    /// `sk <op> value` for `=`, `<`, `<=`, `>`, `>=`.
    Compare(CompareOp, AttributeValue),
    /// `sk BETWEEN low AND high`, inclusive.
    Between(AttributeValue, AttributeValue),
    /// `begins_with(sk, prefix)` for string or binary keys.
    BeginsWith(AttributeValue),
}

impl SortCondition {
    /// Returns `true` if a sort key value satisfies the condition.
    #[must_use]
    pub fn matches(&self, value: &AttributeValue) -> bool {
        match self {
            Self::Compare(op, bound) => match compare(value, bound) {
                Some(ordering) => match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                },
                None => false,
            },
            Self::Between(low, high) => {
                compare(value, low).is_some_and(Ordering::is_ge)
                    && compare(value, high).is_some_and(Ordering::is_le)
            }
            Self::BeginsWith(prefix) => match (value, prefix) {
                (AttributeValue::S(s), AttributeValue::S(p)) => s.starts_with(p.as_str()),
                (AttributeValue::B(b), AttributeValue::B(p)) => b.starts_with(p),
                _ => false,
            },
        }
    }

    fn values(&self) -> Vec<&AttributeValue> {
        match self {
            Self::Compare(_, v) | Self::BeginsWith(v) => vec![v],
            Self::Between(low, high) => vec![low, high],
        }
    }
}

/// A validated Query key condition.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    /// Value of the partition key.
    pub partition: AttributeValue,
    /// Optional sort key restriction.
    pub sort: Option<SortCondition>,
}

impl KeyCondition {
    /// Returns `true` if `item` belongs to the partition and satisfies the
    /// sort condition under `schema`.
    #[must_use]
    #[allow(clippy::implicit_hasher)]
    pub fn matches(&self, schema: &KeySchema, item: &HashMap<String, AttributeValue>) -> bool {
        let in_partition = item
            .get(&schema.partition_key.name)
            .is_some_and(|pk| equals(pk, &self.partition));
        if !in_partition {
            return false;
        }
        match (&self.sort, &schema.sort_key) {
            (Some(cond), Some(sk)) => item.get(&sk.name).is_some_and(|v| cond.matches(v)),
            _ => true,
        }
    }

    /// Check the condition's values against the key types.
    ///
    /// # Errors
    ///
    /// Returns `Condition parameter type does not match schema type for key
    /// attribute '<name>'` on a mismatch.
    pub fn check_types(&self, schema: &KeySchema) -> Result<(), DynamoDBError> {
        check_key_type(&self.partition, &schema.partition_key)?;
        if let (Some(cond), Some(sk)) = (&self.sort, &schema.sort_key) {
            for value in cond.values() {
                check_key_type(value, sk)?;
            }
        }
        Ok(())
    }
}

fn check_key_type(value: &AttributeValue, key: &KeyAttribute) -> Result<(), DynamoDBError> {
    if key.attr_type.matches(value) {
        Ok(())
    } else {
        Err(DynamoDBError::validation(format!(
            "Condition parameter type does not match schema type for key attribute '{}'",
            key.name,
        )))
    }
}

fn not_supported() -> DynamoDBError {
    DynamoDBError::validation("Query key condition not supported")
}

/// Missing partition key condition.
pub(crate) fn missed_key_element(schema: &KeySchema) -> DynamoDBError {
    DynamoDBError::validation(format!(
        "Query condition missed key schema element: {}",
        schema.partition_key.name,
    ))
}

/// Duplicate condition on one key attribute.
pub(crate) fn one_condition_per_key() -> DynamoDBError {
    DynamoDBError::validation("KeyConditionExpressions must only contain one condition per key")
}

/// Which key a single condition restricts.
enum KeyTarget {
    Partition(AttributeValue),
    Sort(SortCondition),
}

/// Build a [`KeyCondition`] from an analyzed `KeyConditionExpression`.
///
/// Accepts `pk = :v` optionally joined by `AND` with one sort key condition
/// (`=`, `<`, `<=`, `>`, `>=`, `BETWEEN` or `begins_with`), in either order.
///
/// # Errors
///
/// Returns a validation error for any other shape, for conditions on
/// non-key attributes, and for values whose type does not match the key.
#[allow(clippy::implicit_hasher)]
pub fn extract_key_condition(
    expr: &Expr,
    schema: &KeySchema,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<KeyCondition, DynamoDBError> {
    let mut leaves = Vec::new();
    flatten_and(expr, &mut leaves)?;

    let mut partition = None;
    let mut sort = None;
    for leaf in leaves {
        match classify(leaf, schema, names, values)? {
            KeyTarget::Partition(value) => {
                if partition.replace(value).is_some() {
                    return Err(one_condition_per_key());
                }
            }
            KeyTarget::Sort(cond) => {
                if sort.replace(cond).is_some() {
                    return Err(one_condition_per_key());
                }
            }
        }
    }

    let partition = partition.ok_or_else(|| missed_key_element(schema))?;
    let condition = KeyCondition { partition, sort };
    condition.check_types(schema)?;
    Ok(condition)
}

fn flatten_and<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) -> Result<(), DynamoDBError> {
    match expr.unparen() {
        Expr::Logical {
            op: LogicalOp::And,
            left,
            right,
        } => {
            flatten_and(left, out)?;
            flatten_and(right, out)
        }
        Expr::Logical {
            op: LogicalOp::Or, ..
        } => Err(DynamoDBError::validation(
            "Unsupported operator in KeyConditionExpression: OR",
        )),
        Expr::Not(_) => Err(DynamoDBError::validation(
            "Unsupported operator in KeyConditionExpression: NOT",
        )),
        Expr::In { .. } => Err(DynamoDBError::validation(
            "Unsupported operator on KeyConditionExpression: operator: IN",
        )),
        other => {
            out.push(other);
            Ok(())
        }
    }
}

/// Resolve a key path operand to the attribute name it names.
fn key_name<'a>(
    operand: &'a Operand,
    schema: &KeySchema,
    names: &'a HashMap<String, String>,
) -> Result<Option<&'a str>, DynamoDBError> {
    let Operand::Path(path) = operand else {
        return Ok(None);
    };
    if path.elements.len() > 1 {
        return Err(DynamoDBError::validation(
            "Key condition expression does not support nested attribute paths",
        ));
    }
    let name = match path.elements.first() {
        Some(PathElement::Name(name)) => name.as_str(),
        Some(PathElement::Alias(alias)) => names.get(alias).map_or(alias.as_str(), String::as_str),
        _ => return Err(not_supported()),
    };
    if !schema.is_key_attribute(name) {
        return Err(missed_key_element(schema));
    }
    Ok(Some(name))
}

fn constant(
    operand: &Operand,
    values: &HashMap<String, AttributeValue>,
) -> Result<AttributeValue, DynamoDBError> {
    match operand {
        Operand::Value(name) => values.get(name).cloned().ok_or_else(|| {
            DynamoDBError::validation(format!(
                "An expression attribute value used in expression is not defined; attribute \
                 value: {name}"
            ))
        }),
        _ => Err(not_supported()),
    }
}

fn classify(
    leaf: &Expr,
    schema: &KeySchema,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<KeyTarget, DynamoDBError> {
    let is_partition = |name: &str| name == schema.partition_key.name;

    match leaf {
        Expr::Compare { left, op, right } => {
            let (name, value, op) = match (key_name(left, schema, names)?, key_name(right, schema, names)?) {
                (Some(name), None) => (name, &**right, *op),
                (None, Some(name)) => (name, &**left, op.flipped()),
                _ => return Err(not_supported()),
            };
            let value = constant(value, values)?;
            if is_partition(name) {
                if op != CompareOp::Eq {
                    return Err(not_supported());
                }
                return Ok(KeyTarget::Partition(value));
            }
            if op == CompareOp::Ne {
                return Err(DynamoDBError::validation(
                    "Unsupported operator on KeyConditionExpression: operator: <>",
                ));
            }
            Ok(KeyTarget::Sort(SortCondition::Compare(op, value)))
        }
        Expr::Between { value, low, high } => {
            let Some(name) = key_name(value, schema, names)? else {
                return Err(not_supported());
            };
            if is_partition(name) {
                return Err(not_supported());
            }
            Ok(KeyTarget::Sort(SortCondition::Between(
                constant(low, values)?,
                constant(high, values)?,
            )))
        }
        Expr::Function(call) => match (call.function(), call.args.as_slice()) {
            (Some(FunctionName::BeginsWith), [target, prefix]) => {
                let Some(name) = key_name(target, schema, names)? else {
                    return Err(not_supported());
                };
                if is_partition(name) {
                    return Err(not_supported());
                }
                Ok(KeyTarget::Sort(SortCondition::BeginsWith(constant(prefix, values)?)))
            }
            _ => Err(DynamoDBError::validation(format!(
                "Unsupported function in KeyConditionExpression: {}",
                call.name
            ))),
        },
        _ => Err(not_supported()),
    }
}

#[cfg(test)]
mod tests {
    use dynalocal_model::types::ScalarAttributeType;

    use super::*;
    use crate::expression::parser::parse_condition;

    fn composite_key_schema() -> KeySchema {
        KeySchema {
            partition_key: KeyAttribute::new("pk", ScalarAttributeType::S),
            sort_key: Some(KeyAttribute::new("sk", ScalarAttributeType::N)),
        }
    }

    fn make_values(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn n(v: &str) -> AttributeValue {
        AttributeValue::N(v.to_owned())
    }

    fn extract(text: &str, values: &[(&str, AttributeValue)]) -> Result<KeyCondition, DynamoDBError> {
        let expr = parse_condition(text).unwrap();
        let names = HashMap::from([("#p".to_owned(), "pk".to_owned())]);
        extract_key_condition(&expr, &composite_key_schema(), &names, &make_values(values))
    }

    #[test]
    fn test_should_extract_partition_only() {
        let cond = extract("#p = :p", &[(":p", s("a"))]).unwrap();
        assert_eq!(cond.partition, s("a"));
        assert!(cond.sort.is_none());
    }

    #[test]
    fn test_should_extract_flipped_sort_condition() {
        let cond = extract(":lo < sk AND pk = :p", &[(":p", s("a")), (":lo", n("3"))]).unwrap();
        assert_eq!(cond.sort, Some(SortCondition::Compare(CompareOp::Gt, n("3"))));
    }

    #[test]
    fn test_should_extract_between_and_begins_with() {
        let cond = extract(
            "pk = :p AND sk BETWEEN :lo AND :hi",
            &[(":p", s("a")), (":lo", n("1")), (":hi", n("5"))],
        )
        .unwrap();
        let sort = cond.sort.unwrap();
        assert!(sort.matches(&n("5")));
        assert!(!sort.matches(&n("5.5")));

        let err = extract("pk = :p AND begins_with(sk, :x)", &[(":p", s("a")), (":x", s("1"))])
            .unwrap_err();
        assert_eq!(
            err.message,
            "Condition parameter type does not match schema type for key attribute 'sk'"
        );
    }

    #[test]
    fn test_should_reject_unsupported_shapes() {
        let values = [(":p", s("a")), (":q", s("b")), (":n", n("1"))];
        let cases = [
            ("pk = :p OR pk = :q", "Unsupported operator in KeyConditionExpression: OR"),
            ("sk = :n", "Query condition missed key schema element: pk"),
            ("pk = :p AND other = :q", "Query condition missed key schema element: pk"),
            ("pk = :p AND pk = :q", "KeyConditionExpressions must only contain one condition per key"),
            ("pk > :p", "Query key condition not supported"),
            ("pk = :p AND sk <> :n", "Unsupported operator on KeyConditionExpression: operator: <>"),
            ("pk = :p AND attribute_exists(sk)", "Unsupported function in KeyConditionExpression: attribute_exists"),
        ];
        for (text, message) in cases {
            assert_eq!(extract(text, &values).unwrap_err().message, message, "{text}");
        }
    }

    #[test]
    fn test_should_reject_mismatched_partition_type() {
        let err = extract("pk = :n", &[(":n", n("1"))]).unwrap_err();
        assert_eq!(
            err.message,
            "Condition parameter type does not match schema type for key attribute 'pk'"
        );
    }

    #[test]
    fn test_should_match_items() {
        let cond = KeyCondition {
            partition: s("a"),
            sort: Some(SortCondition::Compare(CompareOp::Le, n("2"))),
        };
        let schema = composite_key_schema();
        let item: HashMap<String, AttributeValue> =
            HashMap::from([("pk".to_owned(), s("a")), ("sk".to_owned(), n("2.0"))]);
        assert!(cond.matches(&schema, &item));
        let item: HashMap<String, AttributeValue> =
            HashMap::from([("pk".to_owned(), s("a")), ("sk".to_owned(), n("3"))]);
        assert!(!cond.matches(&schema, &item));
    }
}
