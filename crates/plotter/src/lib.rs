//! RI utilization plotter service: configuration and HTTP surface

pub mod api;
pub mod config;
