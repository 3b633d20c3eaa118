//! Conversion of internal errors into DynamoDB errors.

use dynalocal_model::error::{DynamoDBError, DynamoDBErrorCode};

use crate::expression::ExpressionError;
use crate::storage::StorageError;

/// Convert a storage error into a DynamoDB validation error.
///
/// Key shape errors surface as the service's schema mismatch message.
/// Takes `e` by value because this is used as a closure argument to `.map_err()`.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn storage_error_to_dynamodb(e: StorageError) -> DynamoDBError {
    match e {
        StorageError::UnknownIndex { .. } => {
            DynamoDBError::with_message(DynamoDBErrorCode::ValidationException, e.to_string())
        }
        StorageError::MissingKeyAttribute { .. } | StorageError::InvalidKeyType { .. } => {
            DynamoDBError::validation("The provided key element does not match the schema")
                .with_source(e)
        }
    }
}

/// Convert an expression error into a DynamoDB validation error.
///
/// Takes `e` by value because this is used as a closure argument to `.map_err()`.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn expression_error_to_dynamodb(e: ExpressionError) -> DynamoDBError {
    DynamoDBError::with_message(DynamoDBErrorCode::ValidationException, e.to_string())
}

/// Convert an expression error raised by the request parameter `parameter`,
/// e.g. `Invalid FilterExpression: The expression can not be empty;`.
#[must_use]
pub fn expression_error_in(parameter: &str, e: &ExpressionError) -> DynamoDBError {
    DynamoDBError::validation(format!("Invalid {parameter}: {e}"))
}
