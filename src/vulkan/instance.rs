use std::ffi::{c_void, CStr, CString};

use anyhow::{bail, Result};
use ash::{ext::debug_utils, vk, Instance as AshInstance};
use log::info;

use crate::vulkan::entry::Entry;
use crate::{FeatureValue, RendererConfig};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

pub struct Instance {
    pub(crate) inner: AshInstance,
    debug_messenger: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) validation_layers: bool,
}

impl Instance {
    /// Headless instance: no surface extensions, presentation is owned by the caller.
    pub(crate) fn new(entry: &Entry, config: &RendererConfig) -> Result<Self> {
        info!("Using Vulkan Version 1.3");

        let app_name = CString::new(config.name.as_bytes())?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .engine_name(c"penumbra")
            .api_version(vk::API_VERSION_1_3);

        let mut extension_names = vec![];
        let mut layer_names = vec![];

        let layer_name = CString::new(VALIDATION_LAYER)?;
        let mut validation_layers = false;
        if config.validation_layers != FeatureValue::NotUsed {
            if entry.check_layer_support(&[VALIDATION_LAYER])? && entry.supports_debug_utils()? {
                extension_names.push(debug_utils::NAME.as_ptr());
                layer_names.push(layer_name.as_ptr());
                validation_layers = true;
            } else if config.validation_layers == FeatureValue::Needed {
                bail!("Validation Layers are needed but not supported by hardware.")
            }
        }

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let inner = unsafe { entry.inner.create_instance(&instance_create_info, None)? };

        let debug_messenger = if validation_layers {
            Some(setup_debug_messenger(entry, &inner)?)
        } else {
            None
        };

        Ok(Self {
            inner,
            debug_messenger,
            validation_layers,
        })
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    flag: vk::DebugUtilsMessageSeverityFlagsEXT,
    typ: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _: *mut c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Flag;

    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    match flag {
        Flag::VERBOSE => log::trace!("{:?} - {:?}", typ, message),
        Flag::INFO => {}
        Flag::WARNING => log::warn!("{:?} - {:?}", typ, message),
        _ => log::error!("{:?} - {:?}", typ, message),
    }
    vk::FALSE
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &AshInstance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));

    let debug_utils = debug_utils::Instance::new(&entry.inner, instance);
    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

    Ok((debug_utils, messenger))
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((utils, messenger)) = self.debug_messenger.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.inner.destroy_instance(None);
        }
    }
}
