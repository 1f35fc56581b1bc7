//! Text generation collaborator: the trait the engine talks to and an
//! OpenAI-compatible HTTP implementation.

pub mod generator;
pub mod http;

pub use generator::{GenerationRequest, Generator, StyleHints, generate_with_timeout};
pub use http::HttpGenerator;
