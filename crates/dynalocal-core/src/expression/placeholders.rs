//! Request-level checks on `ExpressionAttributeNames` and
//! `ExpressionAttributeValues`.
//!
//! Shape checks run before any expression is parsed; the unused-entry check
//! runs after analysis has collected every referenced placeholder.

use std::collections::HashMap;

use dynalocal_model::{AttributeValue, DynamoDBError, validate_attribute_value};

use super::analysis::Usage;
use super::parser::is_placeholder;

const NAMES: &str = "ExpressionAttributeNames";
const VALUES: &str = "ExpressionAttributeValues";

/// Which expressions a request carries, used for the "can only be specified"
/// message suffix on `ExpressionAttributeValues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionSite {
    /// Scan: only `FilterExpression` can take values.
    Scan,
    /// Query: `KeyConditionExpression` and `FilterExpression` can take values.
    Query,
}

impl ExpressionSite {
    fn missing_suffix(self) -> &'static str {
        match self {
            Self::Scan => ": FilterExpression is null",
            Self::Query => ": KeyConditionExpression and FilterExpression are null",
        }
    }
}

/// Check the shape of `ExpressionAttributeNames`.
///
/// `allowed` is `true` when the request carries any expression.
///
/// # Errors
///
/// Returns a validation error for a map without expressions, an empty map,
/// or a key that is not `#` followed by identifier characters.
#[allow(clippy::implicit_hasher)]
pub fn check_names(
    names: Option<&HashMap<String, String>>,
    allowed: bool,
) -> Result<(), DynamoDBError> {
    let Some(names) = names else {
        return Ok(());
    };
    if !allowed {
        return Err(DynamoDBError::validation(format!(
            "{NAMES} can only be specified when using expressions"
        )));
    }
    if names.is_empty() {
        return Err(DynamoDBError::validation(format!("{NAMES} must not be empty")));
    }
    check_keys(NAMES, names.keys(), '#')
}

/// Check the shape and contents of `ExpressionAttributeValues`.
///
/// `allowed` is `true` when the request carries an expression that can
/// reference values (projection expressions cannot).
///
/// # Errors
///
/// Returns a validation error for a map without expressions, an empty map,
/// a malformed key, or a value failing structural validation.
#[allow(clippy::implicit_hasher)]
pub fn check_values(
    values: Option<&HashMap<String, AttributeValue>>,
    allowed: bool,
    site: ExpressionSite,
) -> Result<(), DynamoDBError> {
    let Some(values) = values else {
        return Ok(());
    };
    if !allowed {
        return Err(DynamoDBError::validation(format!(
            "{VALUES} can only be specified when using expressions{}",
            site.missing_suffix()
        )));
    }
    if values.is_empty() {
        return Err(DynamoDBError::validation(format!("{VALUES} must not be empty")));
    }
    check_keys(VALUES, values.keys(), ':')?;

    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    for key in keys {
        if let Err(err) = validate_attribute_value(&values[key]) {
            return Err(DynamoDBError::validation(format!(
                "{VALUES} contains invalid value: {} for key {key}",
                err.message
            )));
        }
    }
    Ok(())
}

/// Reject map entries that no expression references. Names are checked
/// before values.
///
/// # Errors
///
/// Returns a validation error listing the unused keys in sorted order.
#[allow(clippy::implicit_hasher)]
pub fn check_unused(
    names: Option<&HashMap<String, String>>,
    values: Option<&HashMap<String, AttributeValue>>,
    usage: &Usage,
) -> Result<(), DynamoDBError> {
    if let Some(names) = names {
        let unused = unused_keys(names.keys(), |k| usage.names.contains(k));
        if !unused.is_empty() {
            return Err(unused_error(NAMES, &unused));
        }
    }
    if let Some(values) = values {
        let unused = unused_keys(values.keys(), |k| usage.values.contains(k));
        if !unused.is_empty() {
            return Err(unused_error(VALUES, &unused));
        }
    }
    Ok(())
}

fn check_keys<'k>(
    field: &str,
    keys: impl Iterator<Item = &'k String>,
    sigil: char,
) -> Result<(), DynamoDBError> {
    let mut keys: Vec<&String> = keys.collect();
    keys.sort();
    match keys.into_iter().find(|key| !is_placeholder(key, sigil)) {
        Some(key) => Err(DynamoDBError::validation(format!(
            "{field} contains invalid key: Syntax error; key: \"{key}\""
        ))),
        None => Ok(()),
    }
}

fn unused_keys<'k>(
    keys: impl Iterator<Item = &'k String>,
    used: impl Fn(&str) -> bool,
) -> Vec<&'k str> {
    let mut unused: Vec<&str> = keys.map(String::as_str).filter(|k| !used(k)).collect();
    unused.sort_unstable();
    unused
}

fn unused_error(field: &str, keys: &[&str]) -> DynamoDBError {
    DynamoDBError::validation(format!(
        "Value provided in {field} unused in expressions: keys: {{{}}}",
        keys.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn make_names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn make_values(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn test_should_accept_absent_maps() {
        assert!(check_names(None, false).is_ok());
        assert!(check_values(None, false, ExpressionSite::Scan).is_ok());
    }

    #[test]
    fn test_should_reject_names_without_expressions() {
        let names = make_names(&[("#a", "a")]);
        let err = check_names(Some(&names), false).unwrap_err();
        assert_eq!(
            err.message,
            "ExpressionAttributeNames can only be specified when using expressions"
        );
    }

    #[test]
    fn test_should_reject_values_without_expressions() {
        let values = make_values(&[(":a", AttributeValue::S("x".to_owned()))]);
        let err = check_values(Some(&values), false, ExpressionSite::Scan).unwrap_err();
        assert_eq!(
            err.message,
            "ExpressionAttributeValues can only be specified when using expressions: \
             FilterExpression is null"
        );
        let err = check_values(Some(&values), false, ExpressionSite::Query).unwrap_err();
        assert!(err.message.ends_with(": KeyConditionExpression and FilterExpression are null"));
    }

    #[test]
    fn test_should_reject_empty_maps() {
        let err = check_names(Some(&HashMap::new()), true).unwrap_err();
        assert_eq!(err.message, "ExpressionAttributeNames must not be empty");
        let err = check_values(Some(&HashMap::new()), true, ExpressionSite::Scan).unwrap_err();
        assert_eq!(err.message, "ExpressionAttributeValues must not be empty");
    }

    #[test]
    fn test_should_reject_invalid_keys() {
        let names = make_names(&[("#ok", "a"), ("bad", "b")]);
        let err = check_names(Some(&names), true).unwrap_err();
        assert_eq!(
            err.message,
            "ExpressionAttributeNames contains invalid key: Syntax error; key: \"bad\""
        );
        let values = make_values(&[(":a-b", AttributeValue::Bool(true))]);
        let err = check_values(Some(&values), true, ExpressionSite::Scan).unwrap_err();
        assert_eq!(
            err.message,
            "ExpressionAttributeValues contains invalid key: Syntax error; key: \":a-b\""
        );
    }

    #[test]
    fn test_should_reject_invalid_values() {
        let values = make_values(&[(":s", AttributeValue::S(String::new()))]);
        let err = check_values(Some(&values), true, ExpressionSite::Scan).unwrap_err();
        assert_eq!(
            err.message,
            "ExpressionAttributeValues contains invalid value: One or more parameter values \
             were invalid: An AttributeValue may not contain an empty string for key :s"
        );
    }

    #[test]
    fn test_should_report_unused_entries_sorted() {
        let names = make_names(&[("#b", "b"), ("#a", "a"), ("#used", "u")]);
        let values = make_values(&[(":x", AttributeValue::Null(true))]);
        let usage = Usage {
            names: HashSet::from(["#used".to_owned()]),
            values: HashSet::new(),
        };
        let err = check_unused(Some(&names), Some(&values), &usage).unwrap_err();
        assert_eq!(
            err.message,
            "Value provided in ExpressionAttributeNames unused in expressions: keys: {#a, #b}"
        );

        let names = make_names(&[("#used", "u")]);
        let err = check_unused(Some(&names), Some(&values), &usage).unwrap_err();
        assert_eq!(
            err.message,
            "Value provided in ExpressionAttributeValues unused in expressions: keys: {:x}"
        );
    }
}
