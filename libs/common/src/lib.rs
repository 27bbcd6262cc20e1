pub mod envelope;
pub mod id;

pub use envelope::{Envelope, GroupPayload};
