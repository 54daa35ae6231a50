pub mod client;

pub use client::{GatewayError, GatewaySender};
