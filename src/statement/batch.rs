//! Batch replay of a prepared statement.

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::result::{BatchResults, BatchStatus};
use crate::types::TypeRef;

use super::PreparedQuery;

/// Fill unspecified parameter types from `known`, slot by slot.
///
/// Nothing changes when the slot counts differ.
pub(super) fn fill_unspecified(slots: &mut [Option<Oid>], known: &[TypeRef]) {
    if slots.len() != known.len() {
        return;
    }
    for (slot, ty) in slots.iter_mut().zip(known) {
        if slot.is_none() {
            *slot = Some(ty.oid);
        }
    }
}

/// Run the queued entries of `query` in order.
///
/// A failed entry is recorded and the rest still run, unless the
/// connection broke or strict mode is on. Strict mode also rejects entries
/// that return rows. Entries after an abort are reported as not executed.
pub(super) async fn execute(query: &mut PreparedQuery<'_>) -> Result<BatchResults> {
    let entries = std::mem::take(&mut query.batch);
    let strict = query.conn.strict_mode();
    query.warnings.clear();

    let mut statuses = Vec::with_capacity(entries.len());
    let mut previous: Option<Vec<TypeRef>> = None;
    let mut aborted = false;
    for entry in entries {
        if aborted {
            statuses.push(BatchStatus::NotExecuted);
            continue;
        }
        match query.run(&entry, previous.as_deref()).await {
            Ok((statement, outcome)) => {
                if strict && statement.description.returns_rows() {
                    statuses.push(BatchStatus::Failed(Error::InvalidUsage(
                        "batch entry returned rows".into(),
                    )));
                    aborted = true;
                } else {
                    statuses.push(BatchStatus::Success(outcome.result.rows_affected));
                }
                previous = Some(statement.description.param_types.clone());
            }
            Err(err) => {
                tracing::debug!("batch entry {} failed: {}", statuses.len(), err);
                aborted = strict || err.is_connection_broken();
                statuses.push(BatchStatus::Failed(err));
            }
        }
    }
    Ok(BatchResults::new(statuses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::types::test_support::{int4, int8, text};

    #[test]
    fn unspecified_slots_take_known_types() {
        let mut slots = [None, Some(oid::INT8), None];
        fill_unspecified(&mut slots, &[int4(), int4(), text()]);
        assert_eq!(slots, [Some(oid::INT4), Some(oid::INT8), Some(oid::TEXT)]);
    }

    #[test]
    fn mismatched_lengths_are_left_alone() {
        let mut slots = [None];
        fill_unspecified(&mut slots, &[int4(), int8()]);
        assert_eq!(slots, [None]);
    }
}
