pub mod admin;
pub mod attendance;
pub mod auth;
pub mod memberships;
pub mod payments;
pub mod root;
pub mod virtual_gateway;
