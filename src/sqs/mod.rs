pub mod error;
pub mod queue;
pub mod server;
pub mod state;
pub mod types;

pub use error::SqsError;
pub use state::SqsState;
