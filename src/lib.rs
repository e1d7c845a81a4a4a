//! Last-mile CVRP routing engine.
//!
//! Customers with coordinates and demand volumes go in; a set of vehicle
//! routes minimizing total driving distance comes out, subject to per-class
//! capacity, working-time, stop-count and distance ceilings, with a
//! designated center vehicle privileged inside a downtown zone. Driving
//! distances come from an OSRM-style routing API with chunked retrieval,
//! persistent caching and a great-circle fallback.

pub mod allocator;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fixtures;
pub mod geo;
pub mod matrix;
pub mod pipeline;
pub mod solver;
pub mod test_support;

pub use config::MainConfig;
pub use domain::{Customer, OverflowReason, Route, Solution, UnservedCustomer, VehicleClass};
pub use error::{Error, Result};
pub use matrix::DistanceMatrix;
pub use pipeline::{Pipeline, PipelineOutcome};
