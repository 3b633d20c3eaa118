//! DynamoDB model types for dynalocal.
//!
//! Hand-written serde types for the DynamoDB JSON protocol: the
//! `AttributeValue` tagged union, the exact decimal behind `N`, structural
//! validation, and the `Scan`/`Query` request and response shapes.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod number;
pub mod output;
pub mod types;
pub mod validate;

pub use attribute_value::AttributeValue;
pub use error::{DynamoDBError, DynamoDBErrorCode, ValidationErrors};
pub use number::{Number, NumberError};
pub use validate::{decode_attribute_value, validate_attribute_value, validate_item};

/// A single DynamoDB item.
pub type Item = std::collections::HashMap<String, AttributeValue>;
