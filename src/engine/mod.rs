//! Fan-out/fan-in execution: work units, the isolated worker pool and the
//! reconciler that copies worker outputs back into the shared namespace.

pub mod pool;
pub mod reconcile;
pub mod unit;

#[cfg(test)]
mod integration_tests;

pub use pool::{CompletedUnit, IsolatedWorkerPool, PoolOptions, PoolReport};
pub use reconcile::{ReconciledUnit, ResultReconciler};
pub use unit::{
    CloudOutput, ImportOptions, ImportVariant, LayerRef, MaskBands, MaskRequest, ShadowRequest,
    StepKind, StepRequest, WorkUnit,
};
