//! Small readers over yrs values.
//!
//! Leaf values in the replicated document are stored as JSON strings (curve
//! points, user records, serialized commands); container values are nested
//! yrs maps and arrays. These helpers pull typed values back out of `Out`.

use yrs::{Any, Array, ArrayRef, Map, MapRef, Out, ReadTxn};

pub(crate) fn get_map<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<MapRef> {
    match map.get(txn, key) {
        Some(Out::YMap(inner)) => Some(inner),
        _ => None,
    }
}

pub(crate) fn get_array<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<ArrayRef> {
    match map.get(txn, key) {
        Some(Out::YArray(inner)) => Some(inner),
        _ => None,
    }
}

pub(crate) fn get_string<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<String> {
    match map.get(txn, key) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

pub(crate) fn get_f64<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<f64> {
    match map.get(txn, key) {
        Some(Out::Any(Any::Number(n))) => Some(n),
        Some(Out::Any(Any::BigInt(n))) => Some(n as f64),
        _ => None,
    }
}

/// All string elements of an array, in order.
pub(crate) fn string_items<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Vec<String> {
    (0..array.len(txn))
        .filter_map(|i| match array.get(txn, i) {
            Some(Out::Any(Any::String(s))) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

/// All map elements of an array, in order.
pub(crate) fn map_items<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Vec<MapRef> {
    (0..array.len(txn))
        .filter_map(|i| match array.get(txn, i) {
            Some(Out::YMap(m)) => Some(m),
            _ => None,
        })
        .collect()
}
