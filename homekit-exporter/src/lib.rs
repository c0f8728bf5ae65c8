//! Prometheus metrics exporter for HomeKit bridge accessories.
//!
//! This crate polls a HomeKit bridge's HTTP API for accessory state and
//! exposes the values via an HTTP endpoint for Prometheus scraping.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  HomeKit Bridge │<────│     Poller      │────>│    Registry     │
//! │  (/list, /info) │     │  (normalizer)   │     │  (name->value)  │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (scrape)      │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! homekit-exporter --config homekit_exporter.yaml
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod poller;

pub use client::{BridgeClient, BridgeError};
pub use collector::{MetricRegistry, SharedRegistry, Upsert};
pub use config::ExporterConfig;
pub use http::{HttpError, HttpServer};
pub use mapping::{MetricSample, normalize};
pub use poller::{CycleReport, PollError, Poller};
