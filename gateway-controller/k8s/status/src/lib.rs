//! Status computed by the gateway, route and class reconcilers.
//!
//! Each reconciler writes its part of a shared status object with server-side
//! apply under its own field manager, so the API server keeps their fields
//! apart.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod attached;
pub mod class;
pub mod conditions;
pub mod gateway;
mod resource_id;
pub mod route;

pub use self::resource_id::ResourceId;

/// Owns gateway conditions, listener conditions and supported kinds.
pub const GATEWAY_FIELD_MANAGER: &str = "varnish-gateway-controller";

/// Owns route parent statuses and listener attached-route counts.
pub const ROUTE_FIELD_MANAGER: &str = "varnish-httproute-controller";

pub const GATEWAY_CLASS_FIELD_MANAGER: &str = "varnish-gatewayclass-controller";
