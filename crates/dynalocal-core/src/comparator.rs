//! Ordering and equality over attribute values.
//!
//! Ordering is defined only between two values of the same scalar key type
//! (`S`, `N`, `B`): strings compare by UTF-8 bytes, binaries by raw bytes and
//! numbers as exact decimals. Equality is total: values of different types
//! are never equal, sets compare as unordered collections, and documents
//! compare deeply.

use std::cmp::Ordering;

use dynalocal_model::{AttributeValue, Number};

/// Compare two values of the same ordered type.
///
/// Returns `None` for mixed types, for non-scalar types, and for number
/// literals that do not parse.
#[must_use]
pub fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.as_ref().cmp(y.as_ref())),
        (AttributeValue::N(x), AttributeValue::N(y)) => {
            let x = Number::parse_unchecked(x).ok()?;
            let y = Number::parse_unchecked(y).ok()?;
            Some(x.cmp(&y))
        }
        _ => None,
    }
}

/// Deep, type-aware equality.
#[must_use]
pub fn equals(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => x == y,
        (AttributeValue::B(x), AttributeValue::B(y)) => x == y,
        (AttributeValue::N(x), AttributeValue::N(y)) => numbers_equal(x, y),
        (AttributeValue::Bool(x), AttributeValue::Bool(y)) => x == y,
        (AttributeValue::Null(x), AttributeValue::Null(y)) => x == y,
        (AttributeValue::Ss(x), AttributeValue::Ss(y)) => set_equals(x, y, |p, q| p == q),
        (AttributeValue::Bs(x), AttributeValue::Bs(y)) => set_equals(x, y, |p, q| p == q),
        (AttributeValue::Ns(x), AttributeValue::Ns(y)) => {
            set_equals(x, y, |p, q| numbers_equal(p, q))
        }
        (AttributeValue::L(x), AttributeValue::L(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| equals(p, q))
        }
        (AttributeValue::M(x), AttributeValue::M(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| equals(v, other)))
        }
        _ => false,
    }
}

/// Returns `true` if `set` holds a member equal to the scalar `member`.
///
/// `NS` membership uses numeric equality. Non-set or mismatched operands
/// yield `false`.
#[must_use]
pub fn set_contains(set: &AttributeValue, member: &AttributeValue) -> bool {
    match (set, member) {
        (AttributeValue::Ss(values), AttributeValue::S(s)) => values.contains(s),
        (AttributeValue::Bs(values), AttributeValue::B(b)) => values.contains(b),
        (AttributeValue::Ns(values), AttributeValue::N(n)) => {
            values.iter().any(|v| numbers_equal(v, n))
        }
        _ => false,
    }
}

fn numbers_equal(x: &str, y: &str) -> bool {
    match (Number::parse_unchecked(x), Number::parse_unchecked(y)) {
        (Ok(x), Ok(y)) => x == y,
        _ => x == y,
    }
}

fn set_equals<T>(x: &[T], y: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    x.len() == y.len() && x.iter().all(|a| y.iter().any(|b| eq(a, b)))
}
