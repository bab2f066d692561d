//! A reverse HTTP proxy that multiplexes client traffic across a pool of
//! credentials for one or more upstream APIs.
//!
//! - [`config`] - loading, hard/soft validation, and hot-reload
//! - [`core`] - routing, credential selection, gating, execution, finalization
//! - [`logs`] - structured logger configuration
//! - [`models`] - shared data types: settings, upstream descriptors, errors
//! - [`routes`] - HTTP surface: health probes, the proxy route, the admin API

pub mod config;
pub mod core;
pub mod logs;
pub mod models;
pub mod routes;
