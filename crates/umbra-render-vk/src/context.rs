// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical/logical device and the capabilities the
//! passes size themselves from.
use crate::VkResultExt;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use tracing::{debug, error, info, trace, warn};
use umbra_render::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Scene depth formats in preference order.
const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Depth-only, so the cubemap's barriers and sampled views name just the
/// depth aspect. D16_UNORM is sampleable on every device.
const SHADOW_CANDIDATES: [vk::Format; 2] = [vk::Format::D32_SFLOAT, vk::Format::D16_UNORM];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub(crate) fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DeviceCaps {
    pub depth_format: vk::Format,
    pub shadow_format: vk::Format,
    pub msaa_samples: vk::SampleCountFlags,
    pub max_anisotropy: f32,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", ?types, "{msg}");
    } else {
        trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

struct InstanceOwner {
    // Keeps the loader library alive for the instance's lifetime.
    entry: Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        unsafe {
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

struct SurfaceOwner {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for SurfaceOwner {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) }
    }
}

struct DeviceOwner {
    device: ash::Device,
}

impl Drop for DeviceOwner {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) }
    }
}

/// Everything that outlives the swap chain.
pub(crate) struct Context {
    // Teardown order: device, then surface, then instance.
    device: DeviceOwner,
    surface: SurfaceOwner,
    // Held for teardown; everything above was created from it.
    _instance: InstanceOwner,

    phys: vk::PhysicalDevice,
    queues: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    caps: DeviceCaps,
}

impl Context {
    pub(crate) unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        max_msaa_samples: u32,
    ) -> Result<Self, RenderError> {
        let dh = display
            .display_handle()
            .map_err(|e| RenderError::creation("display handle", e))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| RenderError::creation("window handle", e))?
            .as_raw();

        let entry = Entry::load()
            .map_err(|e| RenderError::CapabilityMissing(format!("Vulkan loader: {e}")))?;
        let validation = cfg!(debug_assertions) && has_validation_layer(&entry);
        let instance = create_instance(&entry, dh, validation)?;
        let mut instance = InstanceOwner {
            entry,
            instance,
            debug: None,
        };
        if validation {
            match create_debug_messenger(&instance.entry, &instance.instance) {
                Ok(d) => instance.debug = Some(d),
                Err(e) => warn!("debug messenger unavailable: {e}"),
            }
        }

        let surface = SurfaceOwner {
            loader: surface::Instance::new(&instance.entry, &instance.instance),
            surface: ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                dh,
                wh,
                None,
            )
            .creating("surface")?,
        };

        let (phys, queues) = pick_physical_device(&instance.instance, &surface)?;
        let props = instance.instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        info!(
            "adapter: {name} (graphics family {}, present family {})",
            queues.graphics, queues.present
        );

        let device = DeviceOwner {
            device: create_device(&instance.instance, phys, queues)?,
        };
        let graphics_queue = device.device.get_device_queue(queues.graphics, 0);
        let present_queue = device.device.get_device_queue(queues.present, 0);
        let swapchain_loader = swapchain::Device::new(&instance.instance, &device.device);
        let memory_properties = instance
            .instance
            .get_physical_device_memory_properties(phys);

        let depth_format = pick_depth_format(
            &instance.instance,
            phys,
            &DEPTH_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        let shadow_format = pick_depth_format(
            &instance.instance,
            phys,
            &SHADOW_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
        )?;
        let limits = props.limits;
        let caps = DeviceCaps {
            depth_format,
            shadow_format,
            msaa_samples: pick_sample_count(
                limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
                max_msaa_samples,
            ),
            max_anisotropy: limits.max_sampler_anisotropy,
        };
        info!(
            "depth {:?}, shadow depth {:?}, msaa {:?}",
            caps.depth_format, caps.shadow_format, caps.msaa_samples
        );

        Ok(Self {
            device,
            surface,
            _instance: instance,
            phys,
            queues,
            graphics_queue,
            present_queue,
            swapchain_loader,
            memory_properties,
            caps,
        })
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.device.device
    }

    pub(crate) fn surface_loader(&self) -> &surface::Instance {
        &self.surface.loader
    }

    pub(crate) fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub(crate) fn queues(&self) -> QueueFamilies {
        self.queues
    }

    pub(crate) fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub(crate) fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub(crate) fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub(crate) fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub(crate) fn caps(&self) -> &DeviceCaps {
        &self.caps
    }
}

unsafe fn has_validation_layer(entry: &Entry) -> bool {
    let found = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
    if !found {
        warn!("validation layer not installed; running without it");
    }
    found
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<ash::Instance, RenderError> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: c"umbra".as_ptr(),
        application_version: 0,
        p_engine_name: c"umbra".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .map_err(|e| RenderError::CapabilityMissing(format!("surface extensions: {e}")))?
        .to_vec();
    let layers: Vec<*const c_char> = if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    entry
        .create_instance(&create_info, None)
        .creating("instance")
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<DebugMessenger, RenderError> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .creating("debug messenger")?;
    Ok(DebugMessenger { loader, messenger })
}

/// First adapter with graphics and present queues, the swap-chain
/// extension, a usable surface and anisotropic sampling.
unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface: &SurfaceOwner,
) -> Result<(vk::PhysicalDevice, QueueFamilies), RenderError> {
    let devices = instance
        .enumerate_physical_devices()
        .calling("vkEnumeratePhysicalDevices")?;
    for phys in devices {
        match check_device(instance, surface, phys) {
            Ok(families) => return Ok((phys, families)),
            Err(reason) => {
                let props = instance.get_physical_device_properties(phys);
                let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
                debug!("skipping adapter {name}: {reason}");
            }
        }
    }
    Err(RenderError::CapabilityMissing(
        "no adapter with graphics and present queues, VK_KHR_swapchain, \
         surface formats and present modes, and samplerAnisotropy"
            .to_string(),
    ))
}

unsafe fn check_device(
    instance: &ash::Instance,
    surface: &SurfaceOwner,
    phys: vk::PhysicalDevice,
) -> Result<QueueFamilies, &'static str> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let graphics = qprops
        .iter()
        .position(|q| q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or("no graphics queue")? as u32;
    let supports_present = |i: u32| {
        surface
            .loader
            .get_physical_device_surface_support(phys, i, surface.surface)
            .unwrap_or(false)
    };
    // Prefer one family doing both.
    let present = if supports_present(graphics) {
        graphics
    } else {
        (0..qprops.len() as u32)
            .find(|&i| supports_present(i))
            .ok_or("no present queue")?
    };

    let exts = instance
        .enumerate_device_extension_properties(phys)
        .map_err(|_| "extension query failed")?;
    if !exts
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
    {
        return Err("no VK_KHR_swapchain");
    }

    let formats = surface
        .loader
        .get_physical_device_surface_formats(phys, surface.surface)
        .unwrap_or_default();
    let modes = surface
        .loader
        .get_physical_device_surface_present_modes(phys, surface.surface)
        .unwrap_or_default();
    if formats.is_empty() || modes.is_empty() {
        return Err("surface has no formats or present modes");
    }

    if instance.get_physical_device_features(phys).sampler_anisotropy != vk::TRUE {
        return Err("no samplerAnisotropy");
    }

    Ok(QueueFamilies { graphics, present })
}

unsafe fn create_device(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    queues: QueueFamilies,
) -> Result<ash::Device, RenderError> {
    let priorities = [1.0_f32];
    let qinfos: Vec<vk::DeviceQueueCreateInfo> = queues
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    instance
        .create_device(phys, &dinfo, None)
        .creating("logical device")
}

unsafe fn pick_depth_format(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    candidates: &[vk::Format],
    required: vk::FormatFeatureFlags,
) -> Result<vk::Format, RenderError> {
    first_supported(candidates, required, |fmt| {
        instance
            .get_physical_device_format_properties(phys, fmt)
            .optimal_tiling_features
    })
    .ok_or_else(|| RenderError::CapabilityMissing(format!("depth format with {required:?}")))
}

pub(crate) fn first_supported(
    candidates: &[vk::Format],
    required: vk::FormatFeatureFlags,
    features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&fmt| features(fmt).contains(required))
}

/// Highest supported count not above `max`; one sample always works.
pub(crate) fn pick_sample_count(supported: vk::SampleCountFlags, max: u32) -> vk::SampleCountFlags {
    [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
    ]
    .into_iter()
    .find(|&(n, flag)| n <= max && supported.contains(flag))
    .map(|(_, flag)| flag)
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}
