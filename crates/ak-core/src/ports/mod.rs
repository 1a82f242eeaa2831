//! Port interfaces for the application layer
//!
//! Ports define the contract between the orchestration logic and
//! infrastructure or platform implementations. This follows Hexagonal
//! Architecture principles: the flow logic never touches durable storage,
//! the ad-platform attribution API, the transaction queue, or the network
//! directly — only these traits.

mod attribution_provider;
mod backend_client;
mod clock;
mod store;
mod transaction_observer;

pub use attribution_provider::{AttributionProviderPort, TokenUnavailable};
pub use backend_client::BackendPort;
pub use clock::ClockPort;
pub use store::FlowStorePort;
pub use transaction_observer::TransactionObserverPort;
