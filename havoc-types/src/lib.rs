//! # havoc-types
//!
//! Container entity types shared across havoc crates.
//!
//! This crate provides the foundational types used by the resolver, the
//! runtime backends and the orchestrator:
//! - [`Container`] - Immutable snapshot of a container as listed by an engine
//! - [`ContainerState`] - Normalized lifecycle state
//! - [`ListOptions`] - Engine-side listing filters
//! - [`ContainerError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod container;
mod error;

pub use container::{
    Container, ContainerBuilder, ContainerState, LabelSelector, ListOptions, SELF_LABEL,
    SKIP_LABEL, STOP_SIGNAL_LABEL,
};
pub use error::ContainerError;
