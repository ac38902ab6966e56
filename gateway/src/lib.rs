//! Teltonika device ingestion gateway. See `SPEC_FULL.md` at the workspace
//! root for the full component breakdown (C1-C10).

pub mod codec;
pub mod config;
pub mod error;
pub mod geo;
pub mod listener;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod repository;
pub mod session;
pub mod tracker;
