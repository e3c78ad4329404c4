use crate::domain::{GroupedUpdates, UpdateRecord};
use std::collections::BTreeMap;

/// Partition records by exact timestamp and emit the groups in ascending
/// time order.
///
/// Within a group, records keep the order they arrived in, so same-timestamp
/// updates across instruments reflect upstream processing order rather than
/// any ordering on instrument ids. Duplicates are kept: two records from the
/// same instrument at the same timestamp both appear in the group.
pub fn group_and_sort_by_time(records: Vec<UpdateRecord>) -> GroupedUpdates {
    let mut groups: BTreeMap<_, Vec<UpdateRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.time_of_update).or_default().push(record);
    }
    groups.into_iter().collect()
}
