//! Routed server selection for cluster deployments.
//!
//! A [`RoutingDriver`] keeps one TTL-bound [`RoutingTable`] per database,
//! refreshed through the ROUTE procedure against known routers, and selects
//! readers or writers round-robin per acquisition.

pub mod driver;
pub mod table;

pub use driver::{is_routing_uri, parse_routing_uri, RoutingDriver, RoutingDriverMetrics};
pub use table::{RoutingTable, ServerRole};
