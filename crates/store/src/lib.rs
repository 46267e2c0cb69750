pub mod gateway;
pub mod persist;
pub mod types;

pub use gateway::{default_state_dir, StoreGateway};
