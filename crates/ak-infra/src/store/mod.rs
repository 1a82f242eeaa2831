mod file_repo;

pub use file_repo::{FileFlowStore, DEFAULT_FLOW_STATE_FILE};
