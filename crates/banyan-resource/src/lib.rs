//! Banyan Resource
//!
//! This crate contains the declaration-time resource model for banyan.
//! These types describe the desired end-state of a deployment before it is
//! assembled into a dependency graph and executed by the engine.
//!
//! A declaration is an ordered sequence of [`ResourceSpec`]s. Spec inputs are
//! [`Value`] trees: literals, nested containers, and [`OutputRef`]s pointing
//! at attributes of other resources that are not known until those resources
//! have been created or updated.

mod id;
mod spec;
mod value;

pub use id::{NodeId, Urn};
pub use spec::{ResourceSpec, ResourceSpecBuilder};
pub use value::{OutputRef, Value};
