//! Hash bucketing for parallel scans.
//!
//! Every item is assigned to one of 4096 buckets derived from its partition
//! key, and a parallel scan's segments own contiguous bucket ranges. The
//! assignment is a pinned, versioned function:
//!
//! * version 1: `bucket = first 12 bits of MD5(canonical key bytes)`, where the
//!   canonical bytes are the UTF-8 string for `S`, the raw bytes for `B` and
//!   the canonical scientific rendering of the normalized number for `N`
//!   (`2`, `2.0` and `0.2E1` all hash as `2E0`).
//! * `segment(bucket, T) = bucket * T / 4096` (integer division).
//!
//! Segment `s` therefore owns buckets `ceil(4096 s / T) ..= ceil(4096 (s + 1) / T) - 1`,
//! which is empty when `T` exceeds 4096 and `s` maps to no bucket.
//!
//! Version 1 hashes the bare canonical bytes with no salt, and numbers through
//! their decimal text rather than a binary encoding. Bucket ranges per segment
//! line up with other DynamoDB emulators, but the segment a given item lands
//! in does not. A different assignment needs a new `HASH_VERSION`.

use std::ops::RangeInclusive;

use dynalocal_model::{AttributeValue, Number};
use md5::{Digest, Md5};

/// Version of the bucket assignment function.
pub const HASH_VERSION: u32 = 1;

/// Number of hash buckets.
pub const HASH_BUCKETS: u32 = 4096;

/// Canonical hashing input for a partition key value.
///
/// Returns `None` for values that cannot be key attributes.
#[must_use]
pub fn canonical_key_bytes(value: &AttributeValue) -> Option<Vec<u8>> {
    match value {
        AttributeValue::S(s) => Some(s.as_bytes().to_vec()),
        AttributeValue::B(b) => Some(b.to_vec()),
        AttributeValue::N(n) => {
            let canonical = Number::parse_unchecked(n).map_or_else(|_| n.clone(), |v| v.to_string());
            Some(canonical.into_bytes())
        }
        _ => None,
    }
}

/// Bucket of a partition key value, in `0..4096`.
#[must_use]
pub fn hash_bucket(value: &AttributeValue) -> Option<u16> {
    let bytes = canonical_key_bytes(value)?;
    let digest = Md5::digest(&bytes);
    Some((u16::from(digest[0]) << 4) | (u16::from(digest[1]) >> 4))
}

/// Segment that owns `bucket` when scanning with `total_segments`.
#[must_use]
pub fn segment_of(bucket: u16, total_segments: u32) -> u32 {
    let scaled = u64::from(bucket) * u64::from(total_segments) / u64::from(HASH_BUCKETS);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Buckets owned by `segment` out of `total_segments`, or `None` when the
/// segment owns no bucket.
#[must_use]
pub fn bucket_range(segment: u32, total_segments: u32) -> Option<RangeInclusive<u16>> {
    if total_segments == 0 || segment >= total_segments {
        return None;
    }
    let start = first_bucket(segment, total_segments);
    let end = first_bucket(segment + 1, total_segments);
    if start >= end {
        return None;
    }
    let start = u16::try_from(start).ok()?;
    let end = u16::try_from(end - 1).ok()?;
    Some(start..=end)
}

/// `ceil(4096 * segment / total)`.
fn first_bucket(segment: u32, total_segments: u32) -> u64 {
    let numerator = u64::from(HASH_BUCKETS) * u64::from(segment);
    numerator.div_ceil(u64::from(total_segments))
}
