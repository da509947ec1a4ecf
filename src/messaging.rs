//! Chat transports.

pub mod matrix;
pub mod traits;

pub use matrix::MatrixTransport;
pub use traits::{InboundStream, Transport};
