pub mod address;
pub mod logging;

pub use address::{Address, AddressError};
pub use tracing;

/// Lifecycle broadcast shared by every long-running component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
