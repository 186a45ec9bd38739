//! IPv4 range classification.
//!
//! CIDR lists are parsed into closed `[start, end]` intervals, every list
//! becomes one numbered group, and the merged table answers "which group does
//! this address belong to" with a binary search.

pub mod cidr;
pub mod config;
pub mod loader;
pub mod table;

pub use cidr::{CidrError, Interval};
pub use config::IpTableConfig;
pub use loader::{LoadError, load_file, load_table, parse_list};
pub use table::{IntervalTable, OverlapPolicy, TableError};

/// Group tag attached to every interval.
pub type GroupId = u64;

/// Returned for addresses no interval covers.
pub const DEFAULT_GROUP: GroupId = 0;

/// Used for the local host when its address is not covered by any interval,
/// so an unclassified host never matches unclassified answers.
pub const DEFAULT_LOCAL_GROUP: GroupId = 1;

/// Group assigned to the first configured source; later sources count up.
pub const FIRST_SOURCE_GROUP: GroupId = 2;
