//! Dense network inference for policy models.
//!
//! Policies are small MLPs evaluated on the blocking pool, never on a
//! connection's I/O worker.

pub mod dense;

pub use dense::{entropy, sigmoid, softmax, Activation, DenseLayer, DenseNetwork};
