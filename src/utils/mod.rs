//! The `utils` module collects cross-cutting pieces shared by every other
//! module: the bus-wide error type and the tracing bootstrap.

pub mod error;
pub mod logging;

pub use error::BusError;
