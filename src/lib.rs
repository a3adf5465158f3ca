//! Streaming client for the multi-agent trip planning service.
//!
//! The planning backend runs several agents (attractions, weather, hotels
//! and the final planner) and reports their progress over a single
//! server-sent event stream. This crate decodes that stream ([`stream`]),
//! drives one cancellable session at a time ([`api::TripClient`]) and folds
//! the events into an observable progress model ([`store::TripStore`]).

pub mod api;
pub mod cli;
pub mod config;
pub mod planner;
pub mod store;
pub mod stream;
