pub mod controller;
pub mod error;

pub use controller::{HaController, Heartbeat, Signal};
pub use error::HaError;
