//! Service readiness probing.

mod policy;
mod probe;

pub use policy::{BackoffStrategy, JitterStrategy, ProbePolicy};
pub use probe::{HttpProber, ProbeAttempt, Prober, Readiness, ReadinessProbe};
