//! Ready-made merge functions for `Merger` and `Sorter`.

use crate::{varint, MergeResult};
use bytes::{BufMut, Bytes};

/// Appends the later value to the earlier one.
pub fn concat(_key: &[u8], a: &[u8], b: &[u8]) -> MergeResult {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.put_slice(a);
    out.put_slice(b);
    Ok(out.into())
}

/// Like `concat` but with `sep` between the two values.
pub fn concat_with(sep: impl Into<Bytes>) -> impl FnMut(&[u8], &[u8], &[u8]) -> MergeResult + Send {
    let sep = sep.into();
    move |_key: &[u8], a: &[u8], b: &[u8]| {
        let mut out = Vec::with_capacity(a.len() + sep.len() + b.len());
        out.put_slice(a);
        out.put_slice(&sep);
        out.put_slice(b);
        Ok(out.into())
    }
}

pub fn keep_first(_key: &[u8], a: &[u8], _b: &[u8]) -> MergeResult {
    Ok(Bytes::copy_from_slice(a))
}

pub fn keep_last(_key: &[u8], _a: &[u8], b: &[u8]) -> MergeResult {
    Ok(Bytes::copy_from_slice(b))
}

/// Treats both values as varint counters and stores their sum. Fails on
/// values that are not exactly one varint and on overflow.
pub fn varint_sum(_key: &[u8], a: &[u8], b: &[u8]) -> MergeResult {
    let sum = counter(a)?
        .checked_add(counter(b)?)
        .ok_or("counter overflows u64")?;
    Ok(varint::encode(sum).into())
}

fn counter(value: &[u8]) -> Result<u64, crate::BoxError> {
    let (n, len) = varint::decode(value)?;
    if len != value.len() {
        return Err(format!("{} trailing bytes after counter", value.len() - len).into());
    }
    Ok(n)
}
