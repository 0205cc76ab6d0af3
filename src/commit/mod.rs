pub mod apply;
pub mod changelog;
pub mod files;
pub mod tx;

use std::time::{SystemTime, UNIX_EPOCH};

pub use apply::{WriteContext, delete_record, write_data_sets};
pub use tx::{DataSet, DataSetAttribute, DataSets, FileChanges, FileRef, WriteResult};

/// Unix seconds, the unit of change-log and file timestamps.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
