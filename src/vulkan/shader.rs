use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use ash::vk;
use log::{trace, warn};

use crate::error::RenderError;
use crate::vulkan::utils::read_shader_from_bytes;
use crate::vulkan::{Context, Device};

/// Windows reports a file held open by the shader compiler as a sharing violation.
const ERROR_SHARING_VIOLATION: i32 = 32;

pub struct ShaderModule {
    device: Arc<Device>,
    pub(crate) inner: vk::ShaderModule,
}

impl ShaderModule {
    pub(crate) fn new(device: Arc<Device>, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let inner = unsafe { device.inner.create_shader_module(&create_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_shader_module(self.inner, None) };
    }
}

/// Reads a compiled SPIR-V module.
///
/// A file still locked by the compiler is reported as [`RenderError::ShaderFileBusy`]
/// with a warning, there is no retry.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if is_sharing_violation(&err) => {
            warn!("Shader {path:?} is locked by another process, re-run once the compiler is done");
            return Err(RenderError::ShaderFileBusy(path.to_owned()).into());
        }
        Err(err) => return Err(err).with_context(|| format!("Failed to read shader {path:?}")),
    };

    trace!("Loaded shader {path:?} ({} bytes)", bytes.len());

    read_shader_from_bytes(&bytes).with_context(|| format!("Shader {path:?} is not valid SPIR-V"))
}

fn is_sharing_violation(err: &io::Error) -> bool {
    cfg!(windows) && err.raw_os_error() == Some(ERROR_SHARING_VIOLATION)
}

impl Context {
    pub fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModule> {
        ShaderModule::new(self.device.clone(), code)
    }

    pub fn load_shader_module(&self, path: &Path) -> Result<ShaderModule> {
        let code = load_spirv(path)?;
        self.create_shader_module(&code)
    }
}
