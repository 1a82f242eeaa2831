mod budget;

pub use budget::{
    BudgetedBackend, FileRequestBudget, DEFAULT_REQUEST_BUDGET_FILE, LIFETIME_REQUEST_CEILING,
};
