pub mod add;
pub mod job;
pub mod list;
pub mod partition;

pub use add::add_command;
pub use job::{remove_command, status_command, update_command};
pub use list::{check_command, list_command, pending_command};
pub use partition::{partition_command, reset_partitions_command};
