//! Shared domain vocabulary: stage names, outcomes, severities and
//! element property values.

pub mod property;
pub mod stage;

pub use property::{PropertySet, PropertyValue};
pub use stage::{Outcome, Severity, StageName};
