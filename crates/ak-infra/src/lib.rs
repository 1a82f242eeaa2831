pub mod backend;
pub mod fs;
pub mod store;
pub mod time;

pub use backend::{BudgetedBackend, FileRequestBudget, LIFETIME_REQUEST_CEILING};
pub use store::FileFlowStore;
pub use time::SystemClock;
