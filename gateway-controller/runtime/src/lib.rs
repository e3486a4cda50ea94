#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use varnish_gateway_controller_core as core;
pub use varnish_gateway_controller_k8s_api as k8s;
pub use varnish_gateway_controller_k8s_status as status;

mod args;
mod backoff;
mod error;
mod gateway;
mod gatewayclass;
mod httproute;
mod infra;
mod lease;
mod lookup;
mod metrics;
mod watches;

pub use self::args::Args;
