pub mod delivery;
pub mod error;
pub mod filter;
pub mod server;
pub mod state;
pub mod topic;
pub mod types;

pub use error::SnsError;
pub use state::SnsState;
