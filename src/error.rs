use std::path::PathBuf;

use thiserror::Error;

use crate::vulkan::{AccelerationStructureLevel, ResourceState};

/// Failures the renderer core can report.
///
/// Every variant except [`RenderError::ShaderFileBusy`] is fatal for the
/// initialization step or frame that produced it. There is no degraded
/// rasterization-only mode to fall back to.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to allocate {size} bytes for {name}")]
    Allocation { name: String, size: u64 },

    #[error("device reported a zero sized {level:?} acceleration structure")]
    EmptyPrebuild { level: AccelerationStructureLevel },

    #[error("{level:?} acceleration structure needs {required} bytes but the destination only has {available}")]
    UndersizedAccelerationStructure {
        level: AccelerationStructureLevel,
        required: u64,
        available: u64,
    },

    #[error("failed to create {level:?} acceleration structure: {result}")]
    AccelerationStructureCreation {
        level: AccelerationStructureLevel,
        result: ash::vk::Result,
    },

    #[error("failed to create pipeline {name}: {result}")]
    PipelineCreation { name: String, result: ash::vk::Result },

    #[error("no pipeline registered under {0:?}")]
    MissingPipeline(String),

    #[error("ray tracing pipeline has no shader group named {0:?}")]
    MissingShaderGroup(String),

    #[error("{name}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        name: String,
        from: ResourceState,
        to: ResourceState,
    },

    #[error("{name}: expected state {expected:?} but resource is in {actual:?}")]
    StateMismatch {
        name: String,
        expected: ResourceState,
        actual: ResourceState,
    },

    #[error("shader file {0:?} is locked by another process, re-run the build")]
    ShaderFileBusy(PathBuf),
}
