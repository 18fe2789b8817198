//! modelhub - model and dataset lifecycle service
//!
//! Trains tabular classifiers on stored datasets, persists them with their
//! metadata, and serves predictions. Two optional side-channels hang off the
//! core: DVC dataset versioning and ClearML experiment tracking. Neither one
//! can fail a request.
//!
//! # Modules
//!
//! ## Core
//! - [`training`] - Capability registry and the built-in classifiers
//! - [`storage`] - Artifact store, metadata store and dataset repository
//! - [`service`] - Lifecycle orchestrator and the [`Hub`](service::Hub) facade
//!
//! ## Side-channels
//! - [`versioning`] - Dataset versioning (DVC)
//! - [`tracking`] - Experiment tracking (ClearML)
//!
//! ## Surfaces
//! - [`server`] - HTTP API
//! - [`rpc`] - JSON RPC endpoint
//! - [`cli`] - Command-line interface

// Core error handling and configuration
pub mod error;
pub mod config;

// Core
pub mod tabular;
pub mod training;
pub mod storage;
pub mod service;

// Side-channels
pub mod versioning;
pub mod tracking;

// Services
pub mod server;
pub mod rpc;
pub mod cli;

pub use config::Settings;
pub use error::{Result, ServiceError};
pub use service::{Hub, Orchestrator, RetrainRequest, TrainOutcome, TrainRequest};
pub use storage::{ArtifactStore, DatasetRecord, DatasetRepository, MetadataStore, ModelRecord};
pub use training::{CapabilityRegistry, ClassLabel, Hyperparameters, TrainedUnit};
