use sha1::{Digest, Sha1};

use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::EvalError;
use crate::util::f64_as_exact_i64;
use crate::AttributeValue;

const BUCKET_SCALE: f64 = 0xFFF_FFFF_FFFF_FFFF_u64 as f64;

/// The hash prefix of a bucket computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketPrefix<'a> {
    /// `"{key}.{salt}"`, for flags without a rollout seed and for segments.
    KeyAndSalt(&'a str, &'a str),
    /// The decimal seed, replacing key and salt.
    Seed(i64),
}

impl BucketPrefix<'_> {
    fn write_hash(&self, hash: &mut Sha1) {
        match self {
            BucketPrefix::KeyAndSalt(key, salt) => {
                hash.update(key.as_bytes());
                hash.update(b".");
                hash.update(salt.as_bytes());
            }
            BucketPrefix::Seed(seed) => hash.update(seed.to_string().as_bytes()),
        }
    }
}

/// Maps an attribute value to a reproducible position in `[0, 1)`.
///
/// Only strings and integral numbers can be bucketed; any other value lands at 0.
pub fn bucket_value(prefix: &BucketPrefix, value: &AttributeValue) -> f64 {
    let id = match value {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Number(f) => match f64_as_exact_i64(*f) {
            Some(i) => i.to_string(),
            None => return 0.0,
        },
        _ => return 0.0,
    };

    let mut hash = Sha1::new();
    prefix.write_hash(&mut hash);
    hash.update(b".");
    hash.update(id.as_bytes());
    let hex = base16ct::lower::encode_string(&hash.finalize());

    // 15 hex characters, 60 bits
    let Ok(num) = u64::from_str_radix(&hex[..15], 16) else {
        return 0.0;
    };
    num as f64 / BUCKET_SCALE
}

/// Buckets the individual context of `kind` by the attribute `by`.
///
/// Returns `Ok(None)` when the context has no individual of that kind. A missing attribute
/// buckets to 0.
pub(crate) fn bucket_context(
    context: &Context,
    kind: &Kind,
    by: &Reference,
    prefix: BucketPrefix,
) -> Result<Option<f64>, EvalError> {
    if !by.is_valid() {
        return Err(EvalError::InvalidReference(by.clone()));
    }
    let Some(individual) = context.as_kind(kind) else {
        return Ok(None);
    };
    Ok(Some(
        individual
            .get_value(by)
            .map_or(0.0, |value| bucket_value(&prefix, &value)),
    ))
}
