//! Row decoding traits and implementations.

use crate::error::{Error, Result};
use crate::value::Value;

use super::{FromValue, from_value};

/// Trait for decoding a row of values into a Rust type.
pub trait FromRow: Sized {
    fn from_row(row: &[Value]) -> Result<Self>;
}

/// Implementation for empty tuple - used for statements that don't return rows
impl FromRow for () {
    fn from_row(_row: &[Value]) -> Result<Self> {
        Ok(())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: &[Value]) -> Result<Self> {
        Ok(row.to_vec())
    }
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($idx:tt => $T:ident),+) => {
        impl<$($T: FromValue),+> FromRow for ($($T,)+) {
            fn from_row(row: &[Value]) -> Result<Self> {
                if row.len() < $count {
                    return Err(Error::Decode(format!(
                        "row has {} columns, tuple needs {}",
                        row.len(),
                        $count
                    )));
                }
                Ok(($(from_value::<$T>(&row[$idx])?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1: 0 => T1);
impl_from_row_tuple!(2: 0 => T1, 1 => T2);
impl_from_row_tuple!(3: 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4: 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_tuple!(7: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_tuple!(8: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
