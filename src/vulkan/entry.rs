use anyhow::Context as _;
use ash::ext::debug_utils;
use itertools::Itertools;

use crate::PenumbraResult;

#[derive(Clone)]
pub struct Entry {
    pub inner: ash::Entry,
}

impl Entry {
    pub fn new() -> PenumbraResult<Self> {
        let inner = unsafe { ash::Entry::load() }.context("Failed to load the Vulkan loader")?;

        Ok(Self { inner })
    }

    pub fn supports_debug_utils(&self) -> PenumbraResult<bool> {
        self.check_extension_support(&[debug_utils::NAME.to_str()?])
    }

    pub fn check_extension_support(&self, extensions: &[&str]) -> PenumbraResult<bool> {
        let available = unsafe { self.inner.enumerate_instance_extension_properties(None)? };

        extensions
            .iter()
            .map(|wanted_extension| {
                let found = available
                    .iter()
                    .map::<PenumbraResult<bool>, _>(|extension| {
                        let name = extension.extension_name_as_c_str()?;
                        let name = name.to_str().context("Failed to get extension name")?;
                        Ok(wanted_extension == &name)
                    })
                    .process_results(|mut iter| iter.any(|b| b))?;

                if !found {
                    log::warn!("Extension not supported: {:?}", wanted_extension);
                }

                Ok(found)
            })
            .process_results(|mut iter| iter.all(|b| b))
    }

    pub fn check_layer_support(&self, layers: &[&str]) -> PenumbraResult<bool> {
        let available = unsafe { self.inner.enumerate_instance_layer_properties()? };

        layers
            .iter()
            .map(|wanted_layer| {
                let found = available
                    .iter()
                    .map::<PenumbraResult<bool>, _>(|layer| {
                        let name = layer.layer_name_as_c_str()?;
                        let name = name.to_str().context("Failed to get layer name")?;
                        Ok(wanted_layer == &name)
                    })
                    .process_results(|mut iter| iter.any(|b| b))?;

                if !found {
                    log::warn!("Layer not supported: {:?}", wanted_layer);
                }

                Ok(found)
            })
            .process_results(|mut iter| iter.all(|b| b))
    }
}
