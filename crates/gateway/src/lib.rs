//! HTTP implementations of the coordination core's external seams.
//!
//! - [`evolution::EvolutionApi`]: WhatsApp number checks and connection state.
//! - [`automation::AutomationApi`]: generate and send webhooks.
//! - [`results::ResultStoreApi`]: staging rows and reading generated messages.

pub mod automation;
pub mod error;
pub mod evolution;
pub mod results;

pub use automation::AutomationApi;
pub use error::GatewayError;
pub use evolution::EvolutionApi;
pub use results::ResultStoreApi;
