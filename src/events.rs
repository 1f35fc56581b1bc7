//! Notable chat moments: templates, detection and storage.

pub mod detector;
pub mod store;
pub mod templates;
pub mod types;

pub use detector::EventDetector;
pub use store::EventStore;
pub use templates::{EventTemplate, EventTemplates};
pub use types::{ChatEvent, EventType};
