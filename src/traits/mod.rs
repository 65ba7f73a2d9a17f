pub mod step;
pub mod store;

pub use step::{ProcessingStep, StepInvocation, StepOutcome};
pub use store::{DatasetSpec, MetadataStore, TemporalStore};
