//! Mooring Core
//!
//! Provider-agnostic pieces of the load balancer attachment tool: the resource
//! model, attribute schemas, duration parsing and the ForceNew-aware differ.

pub mod differ;
pub mod duration;
pub mod provider;
pub mod resource;
pub mod schema;
