//! Shared types, error model, id generation, and configuration for Lakeflow.
//!
//! This crate is the foundation depended on by all other Lakeflow crates.
//! It provides:
//! - [`LakeflowError`]: the unified error type
//! - Data model ([`Scope`], [`PipelinePlan`], [`PipelineTask`], [`RawRecord`], [`Connection`])
//! - [`DomainIdGenerator`]: deterministic cross-source entity ids
//! - Canonical domain entities ([`domain`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod didgen;
pub mod domain;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConnectionConfig, DefaultsConfig, HttpSettings, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use didgen::{DomainId, DomainIdGenerator};
pub use domain::DomainEntity;
pub use error::{LakeflowError, Result};
pub use types::{
    Blueprint, Connection, Credentials, DomainType, OPT_CONNECTION_ID, OPT_TRANSFORMATION_RULES,
    PipelinePlan, PipelineTask, RawRecord, Scope, Stage, SyncPolicy, TaskOptions, decode_options,
};
