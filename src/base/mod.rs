//! Base types shared across the connection core:
//! - [`error`]: the `DialError` taxonomy and platform-error translation
//! - [`deadline`]: the single absolute deadline a pipeline runs under
//! - [`select`]: first-success racing for multi-address dialing

pub mod deadline;
pub mod error;
pub mod select;
