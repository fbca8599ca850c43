//! Wire types for the three-phase-commit protocol: the JSON [`Envelope`]
//! exchanged between coordinator and participant, and the four line-prefixed
//! [`AdminFrame`] administrative requests that precede any JSON decoding.

pub mod admin;
pub mod envelope;
pub mod errors;

pub use admin::AdminFrame;
pub use envelope::{
    Envelope,
    MessageTag,
};
