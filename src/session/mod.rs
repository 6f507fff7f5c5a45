//! Session state: the repository of conversations and the rules for
//! merging generated replies into them.

pub mod merge;
pub mod repository;

pub use merge::{classify, ResponseShape, StreamAccumulator, IMAGE_CAPTION, IMAGE_PLACEHOLDER};
pub use repository::{MessagePatch, SessionRepository, UpdateOutcome, PLACEHOLDER_TITLE};
