/// Router Module Index
///
/// Splits the routing table by whether a route runs behind the gate.

/// Routes outside the gate (probes).
pub mod public;

/// `/api/...` routes. Every request here passes the gate; exemptions are expressed as
/// skippers, not as separate routers.
pub mod api;
