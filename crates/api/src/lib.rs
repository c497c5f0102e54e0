//! FinOps insights service: configuration and HTTP surface

pub mod api;
pub mod config;
