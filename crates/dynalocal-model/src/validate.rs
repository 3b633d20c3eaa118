//! Structural validation of attribute values and items.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::attribute_value::{AttributeValue, EMPTY_ATTRIBUTE_VALUE, MULTIPLE_DATATYPES};
use crate::error::DynamoDBError;
use crate::number::Number;

/// Prefix shared by structural validation messages.
pub const INVALID_PARAMETER_PREFIX: &str = "One or more parameter values were invalid: ";

fn invalid(message: &str) -> DynamoDBError {
    DynamoDBError::validation(format!("{INVALID_PARAMETER_PREFIX}{message}"))
}

/// Validate a single attribute value, recursing into lists and maps.
pub fn validate_attribute_value(value: &AttributeValue) -> Result<(), DynamoDBError> {
    match value {
        AttributeValue::S(s) => {
            if s.is_empty() {
                return Err(invalid("An AttributeValue may not contain an empty string"));
            }
        }
        AttributeValue::B(b) => {
            if b.is_empty() {
                return Err(invalid(
                    "An AttributeValue may not contain a null or empty binary type.",
                ));
            }
        }
        AttributeValue::N(n) => validate_number(n)?,
        AttributeValue::Ss(set) => {
            if set.is_empty() {
                return Err(invalid("An string set  may not be empty"));
            }
            if set.iter().any(String::is_empty) {
                return Err(invalid("An AttributeValue may not contain an empty string"));
            }
            if has_duplicates(set, |a, b| a == b) {
                return Err(invalid(&format!(
                    "Input collection [{}] contains duplicates.",
                    set.join(", ")
                )));
            }
        }
        AttributeValue::Ns(set) => {
            if set.is_empty() {
                return Err(invalid("An number set  may not be empty"));
            }
            let numbers = set
                .iter()
                .map(|n| Number::parse(n))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DynamoDBError::validation(e.to_string()))?;
            if has_duplicates(&numbers, |a, b| a == b) {
                return Err(invalid("Input collection contains duplicates"));
            }
        }
        AttributeValue::Bs(set) => {
            if set.is_empty() {
                return Err(invalid("Binary sets should not be empty"));
            }
            if set.iter().any(bytes::Bytes::is_empty) {
                return Err(invalid(
                    "An AttributeValue may not contain a null or empty binary type.",
                ));
            }
            if has_duplicates(set, |a, b| a == b) {
                let encoded: Vec<String> = set.iter().map(|b| STANDARD.encode(b)).collect();
                return Err(invalid(&format!(
                    "Input collection [{}]of type BS contains duplicates.",
                    encoded.join(", ")
                )));
            }
        }
        AttributeValue::Null(flag) => {
            if !flag {
                return Err(invalid(
                    "Null attribute value types must have the value of true",
                ));
            }
        }
        AttributeValue::Bool(_) => {}
        AttributeValue::L(list) => {
            for item in list {
                validate_attribute_value(item)?;
            }
        }
        AttributeValue::M(map) => {
            for item in map.values() {
                validate_attribute_value(item)?;
            }
        }
    }
    Ok(())
}

/// Validate every attribute of an item.
pub fn validate_item(item: &HashMap<String, AttributeValue>) -> Result<(), DynamoDBError> {
    for value in item.values() {
        validate_attribute_value(value)?;
    }
    Ok(())
}

/// Decode a JSON attribute value, enforcing the single-tag rule and then the
/// structural rules of [`validate_attribute_value`].
///
/// Tag-count violations surface as validation errors; any other decode
/// failure (wrong JSON type, bad base64) is a serialization error.
pub fn decode_attribute_value(json: &serde_json::Value) -> Result<AttributeValue, DynamoDBError> {
    let value = AttributeValue::deserialize(json).map_err(|e| {
        let message = e.to_string();
        if message == EMPTY_ATTRIBUTE_VALUE || message == MULTIPLE_DATATYPES {
            DynamoDBError::validation(message)
        } else {
            DynamoDBError::serialization_exception(message)
        }
    })?;
    validate_attribute_value(&value)?;
    Ok(value)
}

fn validate_number(n: &str) -> Result<(), DynamoDBError> {
    Number::parse(n)
        .map(|_| ())
        .map_err(|e| DynamoDBError::validation(e.to_string()))
}

fn has_duplicates<T>(values: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    values
        .iter()
        .enumerate()
        .any(|(i, a)| values[i + 1..].iter().any(|b| eq(a, b)))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    fn message(value: &AttributeValue) -> String {
        validate_attribute_value(value).unwrap_err().message
    }

    #[test]
    fn test_should_accept_well_formed_values() {
        let values = [
            AttributeValue::S("x".to_owned()),
            AttributeValue::N("-1.5e3".to_owned()),
            AttributeValue::B(Bytes::from_static(b"\x00")),
            AttributeValue::Ss(vec!["a".to_owned(), "b".to_owned()]),
            AttributeValue::Ns(vec!["1".to_owned(), "2".to_owned()]),
            AttributeValue::Bool(false),
            AttributeValue::Null(true),
            AttributeValue::L(vec![]),
            AttributeValue::M(HashMap::new()),
        ];
        for value in &values {
            assert!(validate_attribute_value(value).is_ok(), "{value}");
        }
    }

    #[test]
    fn test_should_reject_empty_scalars() {
        assert_eq!(
            message(&AttributeValue::S(String::new())),
            "One or more parameter values were invalid: An AttributeValue may not contain an \
             empty string"
        );
        assert_eq!(
            message(&AttributeValue::B(Bytes::new())),
            "One or more parameter values were invalid: An AttributeValue may not contain a null \
             or empty binary type."
        );
    }

    #[test]
    fn test_should_reject_empty_sets() {
        assert_eq!(
            message(&AttributeValue::Ss(vec![])),
            "One or more parameter values were invalid: An string set  may not be empty"
        );
        assert_eq!(
            message(&AttributeValue::Ns(vec![])),
            "One or more parameter values were invalid: An number set  may not be empty"
        );
        assert_eq!(
            message(&AttributeValue::Bs(vec![])),
            "One or more parameter values were invalid: Binary sets should not be empty"
        );
    }

    #[test]
    fn test_should_reject_duplicate_set_members() {
        let ss = AttributeValue::Ss(vec!["a".to_owned(), "a".to_owned()]);
        assert!(message(&ss).ends_with("Input collection [a, a] contains duplicates."));

        let ns = AttributeValue::Ns(vec!["1".to_owned(), "1.0".to_owned()]);
        assert!(message(&ns).ends_with("Input collection contains duplicates"));

        let bs = AttributeValue::Bs(vec![Bytes::from_static(b"b"), Bytes::from_static(b"b")]);
        assert!(message(&bs).ends_with("Input collection [Yg==, Yg==]of type BS contains duplicates."));
    }

    #[test]
    fn test_should_reject_false_null() {
        assert!(message(&AttributeValue::Null(false))
            .ends_with("Null attribute value types must have the value of true"));
    }

    #[test]
    fn test_should_report_number_errors_without_prefix() {
        assert_eq!(
            message(&AttributeValue::N("abc".to_owned())),
            "The parameter cannot be converted to a numeric value: abc"
        );
        assert_eq!(
            message(&AttributeValue::Ns(vec!["1E126".to_owned()])),
            "Number overflow. Attempting to store a number with magnitude larger than supported \
             range"
        );
    }

    #[test]
    fn test_should_recurse_into_documents() {
        let nested = AttributeValue::M(HashMap::from([(
            "list".to_owned(),
            AttributeValue::L(vec![AttributeValue::S(String::new())]),
        )]));
        assert!(message(&nested).ends_with("may not contain an empty string"));
    }

    #[test]
    fn test_should_decode_with_tag_checks() {
        let err = decode_attribute_value(&json!({})).unwrap_err();
        assert_eq!(err.message, EMPTY_ATTRIBUTE_VALUE);
        let err = decode_attribute_value(&json!({"S": "a", "BOOL": true})).unwrap_err();
        assert_eq!(err.message, MULTIPLE_DATATYPES);
        let err = decode_attribute_value(&json!({"S": 1})).unwrap_err();
        assert_eq!(err.code, crate::DynamoDBErrorCode::SerializationException);
        let value = decode_attribute_value(&json!({"SS": ["a", "b"]})).unwrap();
        assert!(value.is_set());
    }
}
