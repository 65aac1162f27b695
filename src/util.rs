const FLOAT_TO_INT_MAX: f64 = 9007199254740991_f64;

/// Converts a float to an integer only when the float is within the range where 64-bit floats
/// still represent every integer exactly (magnitude at most 2**53 - 1). Outside of it the cast
/// would silently lose precision.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.abs() <= FLOAT_TO_INT_MAX {
        Some(f as i64)
    } else {
        None
    }
}

/// Returns the integer value of `f` if it has no fractional part.
#[allow(clippy::float_cmp)]
pub(crate) fn f64_as_exact_i64(f: f64) -> Option<i64> {
    f64_to_i64_safe(f).filter(|i| *i as f64 == f)
}

pub(crate) fn is_false(b: &bool) -> bool {
    !(*b)
}
