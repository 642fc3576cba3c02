//! Row model and the leaf machinery shared by every part of the engine.
//!
//! Nothing in this crate knows about steps or schedulers: it provides the typed
//! [`Row`]/[`RowShape`] pair, the bounded [`RowSet`] queue that connects two step
//! copies, the partitioning functions used to route rows between copies, and the
//! internal event plumbing used for logs and metrics.

#![deny(missing_debug_implementations)]

pub mod internal_event;
pub mod partition;
pub mod row;
pub mod rowset;
pub mod shape;
pub mod value;

pub use partition::{
    assign_partition, ModPartitioner, PartitionError, PartitionMethod, PartitionSchema, Partitioner,
};
pub use row::Row;
pub use rowset::{GetError, PutError, RowSet, RowSetId, DEFAULT_ROWSET_SIZE};
pub use shape::{ColumnMeta, LayoutError, RowShape};
pub use value::{Value, ValueParseError, ValueType};
