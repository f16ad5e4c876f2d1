//! Dependency graph and resolution

pub mod graph;
pub mod resolver;

pub use graph::{DependencyGraph, DependencyNode};
pub use resolver::{
    ConflictKind, DependencyConflict, DependencyResolver, ResolutionResult, ResolutionStrategy,
};
