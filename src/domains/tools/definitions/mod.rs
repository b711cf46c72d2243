//! Tool definitions module.
//!
//! This module exports all available tool definitions.
//! Each tool lives in its own module; `geolocation` and `outbound` hold the
//! plumbing shared by the tools that call out to the network.

pub mod calculator;
pub mod geolocation;
pub mod network;
pub mod outbound;
pub mod weather;

pub use calculator::CalculatorTool;
pub use network::NetworkTool;
pub use weather::WeatherTool;
