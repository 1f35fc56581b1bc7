//! Chat transports: the trait the engine sends through and a console adapter.

pub mod console;
pub mod traits;

pub use console::ConsoleTransport;
pub use traits::{InboundStream, Transport, TransportDyn};
