//! DynamoDB `AttributeValue` type with custom serialization.
//!
//! `AttributeValue` is a tagged union where exactly one variant is present.
//! The JSON wire format uses single-key objects like `{"S": "hello"}`. The
//! deserializer counts populated tags so that `{}` and `{"S":"a","N":"1"}`
//! are rejected with the service's own messages.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::number::{Number, NumberError};

/// Message for an attribute value with no populated type tag.
pub const EMPTY_ATTRIBUTE_VALUE: &str = "One or more parameter values were invalid: Supplied \
     AttributeValue is empty, must contain exactly one of the supported datatypes";

/// Message for an attribute value with two or more populated type tags.
pub const MULTIPLE_DATATYPES: &str = "One or more parameter values were invalid: Supplied \
     AttributeValue has more than one datatypes set, must contain exactly one of the supported \
     datatypes";

/// All type descriptors, in wire order.
pub const TYPE_DESCRIPTORS: [&str; 10] = ["S", "N", "B", "SS", "NS", "BS", "BOOL", "NULL", "L", "M"];

/// DynamoDB attribute value.
///
/// Numbers stay string-encoded so the original literal is echoed back to
/// clients; [`AttributeValue::number`] gives the exact decimal view.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String value.
    S(String),
    /// Number value (string-encoded for arbitrary precision).
    N(String),
    /// Binary value (base64-encoded in JSON).
    B(Bytes),
    /// String Set.
    Ss(Vec<String>),
    /// Number Set (string-encoded).
    Ns(Vec<String>),
    /// Binary Set (base64-encoded in JSON).
    Bs(Vec<Bytes>),
    /// Boolean value.
    Bool(bool),
    /// Null value.
    Null(bool),
    /// List of attribute values.
    L(Vec<AttributeValue>),
    /// Map of attribute values.
    M(HashMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Returns `true` if this is a string value.
    #[must_use]
    pub fn is_s(&self) -> bool {
        matches!(self, Self::S(_))
    }

    /// Returns `true` if this is a number value.
    #[must_use]
    pub fn is_n(&self) -> bool {
        matches!(self, Self::N(_))
    }

    /// Returns `true` if this is a binary value.
    #[must_use]
    pub fn is_b(&self) -> bool {
        matches!(self, Self::B(_))
    }

    /// Returns `true` for the scalar key types `S`, `N` and `B`.
    #[must_use]
    pub fn is_key_scalar(&self) -> bool {
        matches!(self, Self::S(_) | Self::N(_) | Self::B(_))
    }

    /// Returns `true` for `SS`, `NS` and `BS`.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Ss(_) | Self::Ns(_) | Self::Bs(_))
    }

    /// Returns the string value if this is an `S` variant.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number string if this is an `N` variant.
    #[must_use]
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the bytes if this is a `B` variant.
    #[must_use]
    pub fn as_b(&self) -> Option<&Bytes> {
        match self {
            Self::B(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the map if this is an `M` variant.
    #[must_use]
    pub fn as_m(&self) -> Option<&HashMap<String, AttributeValue>> {
        match self {
            Self::M(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the list if this is an `L` variant.
    #[must_use]
    pub fn as_l(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::L(l) => Some(l),
            _ => None,
        }
    }

    /// Parses an `N` variant into an exact decimal.
    ///
    /// Returns `None` for other variants.
    #[must_use]
    pub fn number(&self) -> Option<Result<Number, NumberError>> {
        self.as_n().map(Number::parse)
    }

    /// Returns the DynamoDB type descriptor string (e.g., "S", "N", "BOOL").
    #[must_use]
    pub fn type_descriptor(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Ss(_) => "SS",
            Self::Ns(_) => "NS",
            Self::Bs(_) => "BS",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
            Self::L(_) => "L",
            Self::M(_) => "M",
        }
    }
}

impl Eq for AttributeValue {}

impl std::hash::Hash for AttributeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::S(s) | Self::N(s) => s.hash(state),
            Self::B(b) => b.hash(state),
            Self::Bool(b) | Self::Null(b) => b.hash(state),
            Self::Ss(v) | Self::Ns(v) => v.hash(state),
            Self::Bs(v) => v.hash(state),
            Self::L(v) => v.hash(state),
            Self::M(m) => {
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);
                for (k, v) in pairs {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

/// Renders values the way service error messages quote them, e.g. `{N:5}`.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(s) => write!(f, "{{S:{s}}}"),
            Self::N(n) => write!(f, "{{N:{n}}}"),
            Self::B(b) => write!(f, "{{B:{}}}", STANDARD.encode(b)),
            Self::Ss(v) => write!(f, "{{SS:[{}]}}", v.join(", ")),
            Self::Ns(v) => write!(f, "{{NS:[{}]}}", v.join(", ")),
            Self::Bs(v) => {
                let encoded: Vec<String> = v.iter().map(|b| STANDARD.encode(b)).collect();
                write!(f, "{{BS:[{}]}}", encoded.join(", "))
            }
            Self::Bool(b) => write!(f, "{{BOOL:{b}}}"),
            Self::Null(b) => write!(f, "{{NULL:{b}}}"),
            Self::L(v) => {
                f.write_str("{L:[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]}")
            }
            Self::M(m) => {
                let mut keys: Vec<_> = m.keys().collect();
                keys.sort();
                f.write_str("{M:{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={}", m[key])?;
                }
                f.write_str("}}")
            }
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::S(s) => map.serialize_entry("S", s)?,
            Self::N(n) => map.serialize_entry("N", n)?,
            Self::B(b) => map.serialize_entry("B", &STANDARD.encode(b))?,
            Self::Ss(v) => map.serialize_entry("SS", v)?,
            Self::Ns(v) => map.serialize_entry("NS", v)?,
            Self::Bs(v) => {
                let encoded: Vec<String> = v.iter().map(|b| STANDARD.encode(b)).collect();
                map.serialize_entry("BS", &encoded)?;
            }
            Self::Bool(b) => map.serialize_entry("BOOL", b)?,
            Self::Null(b) => map.serialize_entry("NULL", b)?,
            Self::L(list) => map.serialize_entry("L", list)?,
            Self::M(m) => map.serialize_entry("M", m)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AttributeValueVisitor)
    }
}

struct AttributeValueVisitor;

impl AttributeValueVisitor {
    /// Decodes one tagged entry; JSON `null` payloads count as unset.
    fn decode_entry<'de, M: MapAccess<'de>>(
        key: &str,
        map: &mut M,
    ) -> Result<Option<AttributeValue>, M::Error> {
        let value = match key {
            "S" => map.next_value::<Option<String>>()?.map(AttributeValue::S),
            "N" => map.next_value::<Option<String>>()?.map(AttributeValue::N),
            "B" => match map.next_value::<Option<String>>()? {
                Some(encoded) => Some(AttributeValue::B(decode_base64::<M::Error>(&encoded)?)),
                None => None,
            },
            "SS" => map.next_value::<Option<Vec<String>>>()?.map(AttributeValue::Ss),
            "NS" => map.next_value::<Option<Vec<String>>>()?.map(AttributeValue::Ns),
            "BS" => match map.next_value::<Option<Vec<String>>>()? {
                Some(encoded) => Some(AttributeValue::Bs(
                    encoded
                        .iter()
                        .map(|e| decode_base64::<M::Error>(e))
                        .collect::<Result<_, _>>()?,
                )),
                None => None,
            },
            "BOOL" => map.next_value::<Option<bool>>()?.map(AttributeValue::Bool),
            "NULL" => map.next_value::<Option<bool>>()?.map(AttributeValue::Null),
            "L" => map.next_value::<Option<Vec<AttributeValue>>>()?.map(AttributeValue::L),
            "M" => map
                .next_value::<Option<HashMap<String, AttributeValue>>>()?
                .map(AttributeValue::M),
            other => return Err(de::Error::unknown_field(other, &TYPE_DESCRIPTORS)),
        };
        Ok(value)
    }
}

fn decode_base64<E: de::Error>(encoded: &str) -> Result<Bytes, E> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(de::Error::custom)
}

impl<'de> Visitor<'de> for AttributeValueVisitor {
    type Value = AttributeValue;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a DynamoDB AttributeValue object with exactly one type key")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<Self::Value, M::Error> {
        let mut found: Option<AttributeValue> = None;
        while let Some(key) = map.next_key::<String>()? {
            let Some(value) = Self::decode_entry(&key, &mut map)? else {
                continue;
            };
            if found.is_some() {
                return Err(de::Error::custom(MULTIPLE_DATATYPES));
            }
            found = Some(value);
        }
        found.ok_or_else(|| de::Error::custom(EMPTY_ATTRIBUTE_VALUE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_serialize_string_value() {
        let val = AttributeValue::S("hello".to_owned());
        let json = serde_json::to_string(&val).unwrap();
        assert_eq!(json, r#"{"S":"hello"}"#);
    }

    #[test]
    fn test_should_serialize_list_value() {
        let val = AttributeValue::L(vec![
            AttributeValue::S("a".to_owned()),
            AttributeValue::N("1".to_owned()),
        ]);
        let json = serde_json::to_string(&val).unwrap();
        assert_eq!(json, r#"{"L":[{"S":"a"},{"N":"1"}]}"#);
    }

    #[test]
    fn test_should_roundtrip_binary_set() {
        let val = AttributeValue::Bs(vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
        let json = serde_json::to_string(&val).unwrap();
        assert_eq!(json, r#"{"BS":["Yg==","Yw=="]}"#);
        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }

    #[test]
    fn test_should_reject_empty_attribute_value() {
        let err = serde_json::from_str::<AttributeValue>("{}").unwrap_err();
        assert!(err.to_string().starts_with(EMPTY_ATTRIBUTE_VALUE));
    }

    #[test]
    fn test_should_reject_multiple_datatypes() {
        let err = serde_json::from_str::<AttributeValue>(r#"{"S":"a","N":"1"}"#).unwrap_err();
        assert!(err.to_string().starts_with(MULTIPLE_DATATYPES));
    }

    #[test]
    fn test_should_ignore_null_tags() {
        let val: AttributeValue = serde_json::from_str(r#"{"S":null,"N":"1"}"#).unwrap();
        assert_eq!(val, AttributeValue::N("1".to_owned()));
    }

    #[test]
    fn test_should_reject_nested_empty_value() {
        let err = serde_json::from_str::<AttributeValue>(r#"{"M":{"a":{}}}"#).unwrap_err();
        assert!(err.to_string().starts_with(EMPTY_ATTRIBUTE_VALUE));
    }

    #[test]
    fn test_should_display_like_service_messages() {
        assert_eq!(AttributeValue::N("5".to_owned()).to_string(), "{N:5}");
        assert_eq!(AttributeValue::S("x".to_owned()).to_string(), "{S:x}");
        assert_eq!(
            AttributeValue::Ss(vec!["a".to_owned(), "b".to_owned()]).to_string(),
            "{SS:[a, b]}"
        );
    }

    #[test]
    fn test_should_expose_exact_number() {
        let n = AttributeValue::N("2.50".to_owned());
        assert_eq!(n.number().unwrap().unwrap(), Number::parse("2.5").unwrap());
        assert!(AttributeValue::S("2".to_owned()).number().is_none());
    }
}
