pub mod contracts;
pub mod envelope;
pub mod payload;
pub mod sse;
pub mod value;

pub use envelope::{Envelope, EventKind, EventLevel, StreamCursor};
pub use payload::{EventPayload, RosterAgent, TimelineEntry};
