/// Router Module Index
///
/// Routes are grouped by the access they require. Access control is applied as layers
/// on each group in `create_router` and in the group constructors, never inside the
/// handlers.

/// Session endpoints reachable without an access token.
pub mod public;

/// Routes behind the session middleware, some narrowed further by a role gate.
pub mod authenticated;

/// Routes restricted to the ADMIN role.
pub mod admin;
