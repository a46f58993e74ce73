//! Courier HTTP ingress: accepts notification requests, upgrades push
//! connections, and exposes service health.

pub mod routes;
pub mod state;
