// src/config/mod.rs

//! Pipeline file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate references, syntax and explicit-edge acyclicity (`validate.rs`).
//! - Turn `[params]` plus CLI overrides into a [`Params`] snapshot (`params.rs`).
//! - Provide the `pipedag config` skeleton (`skeleton.rs`).

pub mod loader;
pub mod model;
pub mod params;
pub mod skeleton;
pub mod validate;

pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{PipelineFile, PipelineSection, TaskConfig};
pub use params::{ParamValue, Params};
pub use skeleton::default_skeleton;
