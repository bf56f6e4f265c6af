//! Policy models: a baseline and a constrained actor-critic behind one trait

pub mod baseline;
pub mod constrained;
pub mod model_file;
pub mod traits;

pub use baseline::BaselinePolicy;
pub use constrained::{ConstrainedPolicy, DEFAULT_CONSTRAINT_THRESHOLD};
pub use model_file::{ActorCritic, PolicyModelFile};
pub use traits::{argmax, ConstraintCheck, Policy};
