//! Shared utilities: clocks, serializable primitives, and telemetry setup.

pub mod clock;
pub mod serde;
pub mod telemetry;

pub use clock::*;
pub use self::serde::*;
pub use telemetry::*;
