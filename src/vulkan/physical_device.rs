use std::ffi::CStr;

use anyhow::{bail, Result};
use ash::vk::{self, FormatFeatureFlags, PhysicalDeviceType};

use crate::vulkan::instance::Instance;
use crate::vulkan::queue::QueueFamily;
use crate::RendererConfig;

#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub inner: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,

    pub limits: vk::PhysicalDeviceLimits,

    pub graphics_queue_family: QueueFamily,
}

/// Everything a device needs to run the hybrid shadow frame.
pub(crate) const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

impl Instance {
    pub(crate) fn select_suitable_physical_device(
        &self,
        config: &RendererConfig,
    ) -> Result<PhysicalDevice> {
        let physical_devices = unsafe { self.inner.enumerate_physical_devices()? };

        let mut candidates = vec![];
        for inner in physical_devices {
            let properties = unsafe { self.inner.get_physical_device_properties(inner) };
            let name = properties
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            log::info!("Possible Device: {name}");

            let mut ok = true;
            let mut minus_points = 0;

            log::info!(" -- Device Type: {:?}", properties.device_type);
            if properties.device_type == PhysicalDeviceType::VIRTUAL_GPU {
                log::info!(" ---- -150 Points");
                minus_points -= 150;
            } else if properties.device_type == PhysicalDeviceType::CPU {
                log::info!(" ---- -100 Points");
                minus_points -= 100;
            } else if properties.device_type == PhysicalDeviceType::INTEGRATED_GPU {
                log::info!(" ---- -50 Points");
                minus_points -= 50;
            } else if properties.device_type == PhysicalDeviceType::OTHER {
                log::info!(" ---- -10 Points");
                minus_points -= 10;
            }

            if properties.api_version < vk::API_VERSION_1_3 {
                ok = false;
                log::info!(" -- Vulkan 1.3 not supported");
            }

            let graphics_queue_family = unsafe {
                self.inner
                    .get_physical_device_queue_family_properties(inner)
            }
            .into_iter()
            .enumerate()
            .map(|(index, props)| QueueFamily::new(index as u32, props))
            .find(|family| family.supports_graphics() && family.supports_compute() && family.has_queues());

            if graphics_queue_family.is_none() {
                ok = false;
                log::info!(" -- No Graphics Queue");
            }

            let extensions = unsafe { self.inner.enumerate_device_extension_properties(inner)? };
            for required in REQUIRED_DEVICE_EXTENSIONS {
                let supported = extensions
                    .iter()
                    .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == required));

                if !supported {
                    ok = false;
                    log::info!(" -- Extension {required:?} not supported");
                }
            }

            if !self.supports_features(inner) {
                ok = false;
                log::info!(" -- Required device features not supported");
            }

            let format_checks = [
                (config.shadow_format, FormatFeatureFlags::STORAGE_IMAGE | FormatFeatureFlags::SAMPLED_IMAGE),
                (config.hdr_format, FormatFeatureFlags::COLOR_ATTACHMENT | FormatFeatureFlags::SAMPLED_IMAGE),
                (config.depth_format, FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT | FormatFeatureFlags::SAMPLED_IMAGE),
            ];
            for (format, features) in format_checks {
                let props = unsafe {
                    self.inner
                        .get_physical_device_format_properties(inner, format)
                };
                if !props.optimal_tiling_features.contains(features) {
                    ok = false;
                    log::info!(" -- Format {format:?} does not support {features:?}");
                }
            }

            match graphics_queue_family {
                Some(graphics_queue_family) if ok => {
                    log::info!(" -- Total: {minus_points} Points");
                    candidates.push((
                        minus_points,
                        PhysicalDevice {
                            inner,
                            name,
                            device_type: properties.device_type,
                            limits: properties.limits,
                            graphics_queue_family,
                        },
                    ));
                }
                _ => log::info!(" -- Not suitable"),
            }
        }

        let Some((_, device)) = candidates.into_iter().max_by_key(|(points, _)| *points) else {
            bail!("Could not find a device with ray tracing support.");
        };

        log::info!("Selected Device: {}", device.name);

        Ok(device)
    }

    fn supports_features(&self, inner: vk::PhysicalDevice) -> bool {
        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default();
        let mut acceleration_structure_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut ray_tracing_pipeline_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();

        let mut features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut vulkan_12_features)
            .push_next(&mut vulkan_13_features)
            .push_next(&mut acceleration_structure_features)
            .push_next(&mut ray_tracing_pipeline_features);

        unsafe {
            self.inner
                .get_physical_device_features2(inner, &mut features)
        };

        let base = features.features;
        base.shader_int64 == vk::TRUE
            && vulkan_12_features.buffer_device_address == vk::TRUE
            && vulkan_12_features.runtime_descriptor_array == vk::TRUE
            && vulkan_12_features.descriptor_binding_partially_bound == vk::TRUE
            && vulkan_12_features.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
            && vulkan_12_features.descriptor_binding_storage_image_update_after_bind == vk::TRUE
            && vulkan_12_features.descriptor_binding_update_unused_while_pending == vk::TRUE
            && vulkan_12_features.shader_sampled_image_array_non_uniform_indexing == vk::TRUE
            && vulkan_13_features.dynamic_rendering == vk::TRUE
            && vulkan_13_features.synchronization2 == vk::TRUE
            && acceleration_structure_features.acceleration_structure == vk::TRUE
            && ray_tracing_pipeline_features.ray_tracing_pipeline == vk::TRUE
    }
}
