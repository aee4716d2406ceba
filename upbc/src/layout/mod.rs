pub mod classify;
pub mod fasttable;
pub mod file;
pub mod platform;

pub use classify::{classify, FieldClass, PresenceKind};
pub use fasttable::{fast_decode_table, TableEntry, GENERIC_DECODER};
pub use file::{FileLayout, MessageTables};
pub use platform::build_message;
