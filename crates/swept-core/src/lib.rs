#![deny(missing_docs)]
#![doc = "Shared error taxonomy and provenance types for the swept experiment driver."]

pub mod errors;
pub mod provenance;

pub use errors::{ErrorInfo, SweepError};
pub use provenance::{RunProvenance, SchemaVersion};
