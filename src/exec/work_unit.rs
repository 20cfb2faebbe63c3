// src/exec/work_unit.rs

//! What an in-process function work unit sees.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Params;
use crate::fs::FileSystem;
use crate::pattern::Captures;

/// Inputs, outputs and the configuration snapshot for one instance.
///
/// `outputs` are the paths the function must write (staging paths when the
/// task stages its outputs); write them through `fs`.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub instance_id: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub captures: Captures,
    pub params: Arc<Params>,
    pub fs: Arc<dyn FileSystem>,
}

impl WorkContext {
    pub fn input(&self, idx: usize) -> Option<&PathBuf> {
        self.inputs.get(idx)
    }

    pub fn output(&self, idx: usize) -> Option<&PathBuf> {
        self.outputs.get(idx)
    }
}
