//! Policy enforcement for DomeKit.
//!
//! Compiles a manifest's allow-lists into a [`PolicyEngine`] and exposes the
//! path canonicalization primitives the engine is built on. Decisions are
//! pure values; enforcement is the caller's job (the router refuses to run a
//! denied tool, the sandboxes re-check their own resources).

pub mod engine;
pub mod path;

pub use engine::{PolicyEngine, PolicyError};
pub use path::{canonical_path, starts_at_boundary, PathError};
