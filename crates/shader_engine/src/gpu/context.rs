//! Vulkan context management
//!
//! Bootstraps the instance, the first physical device, one logical device with
//! a graphics queue and a transfer queue, the single command pool and the two
//! reusable fences (render and transfer). Created once per process and shared
//! through `Arc<GpuContext>`.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use std::ffi::{c_void, CStr};
use std::sync::Arc;
use std::time::Duration;

use super::{VulkanError, VulkanResult};
use crate::config::EngineConfig;
use crate::foundation::time::Stopwatch;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// How long the host blocks on a render/compute fence
///
/// `Unbounded` is the default: a hung driver blocks the calling thread forever
/// and there is no way to cancel a submitted command buffer. `Timeout` turns
/// that hang into [`VulkanError::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceWait {
    /// Block until the GPU signals
    #[default]
    Unbounded,
    /// Give up after the given duration
    Timeout(Duration),
}

impl FenceWait {
    fn as_nanos(self) -> u64 {
        match self {
            Self::Unbounded => u64::MAX,
            Self::Timeout(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        }
    }
}

/// Options for [`GpuContext::new`]
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Application name reported to the driver
    pub application_name: String,
    /// Enable the Khronos validation layer and the debug messenger
    pub validation: bool,
    /// Severities forwarded to the log
    pub severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    /// Message types forwarded to the log
    pub message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    /// Wait policy for render/compute fences
    pub fence_wait: FenceWait,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ContextOptions {
    /// Derive context options from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            application_name: "ShaderEngine".to_string(),
            validation: config.debug.vulkan.validation,
            severity: vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(config.debug.vulkan.severity),
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::from_raw(config.debug.vulkan.message_type),
            fence_wait: config.gpu.fence_wait(),
        }
    }
}

/// Vulkan instance wrapper with RAII cleanup
struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    fn new(options: &ContextOptions) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::Loader(e.to_string()))?;

        let app_name = std::ffi::CString::new(options.application_name.as_str())
            .map_err(|e| VulkanError::InvalidOperation { reason: e.to_string() })?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"ShaderEngine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let validation = options.validation && Self::validation_available(&entry);

        let layers: Vec<*const std::ffi::c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let extensions: Vec<*const std::ffi::c_char> = if validation {
            vec![DebugUtils::name().as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut this = Self { entry, instance, debug: None };

        if validation {
            let debug_utils = DebugUtils::new(&this.entry, &this.instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(options.severity)
                .message_type(options.message_type)
                .pfn_user_callback(Some(debug_callback));

            // A missing messenger only costs diagnostics
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => this.debug = Some((debug_utils, messenger)),
                Err(e) => log::warn!("Failed to install Vulkan debug messenger: {:?}", e),
            }
        }

        Ok(this)
    }

    fn validation_available(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let present = layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        });
        if !present {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        present
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        log::info!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Pick the first graphics-capable and the first transfer-capable queue family
///
/// The two may be the same family.
pub fn select_queue_families(families: &[vk::QueueFamilyProperties]) -> VulkanResult<(u32, u32)> {
    let first_with = |flag: vk::QueueFlags| {
        families.iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(flag))
            .map(|index| index as u32)
    };

    let graphics = first_with(vk::QueueFlags::GRAPHICS).ok_or(VulkanError::NoQueueFamily("graphics"))?;
    let transfer = first_with(vk::QueueFlags::TRANSFER).ok_or(VulkanError::NoQueueFamily("transfer"))?;
    Ok((graphics, transfer))
}

/// Family that upload submissions actually use
///
/// Upload command buffers come from the single pool, which belongs to the
/// graphics family, so a distinct transfer family is overridden.
fn upload_family(graphics_family: u32, transfer_family: u32) -> u32 {
    if transfer_family != graphics_family {
        log::info!(
            "Transfer family {} differs from graphics family {}; uploads use the graphics queue",
            transfer_family, graphics_family
        );
    }
    graphics_family
}

/// Logical device wrapper with RAII cleanup
struct LogicalDevice {
    device: Device,
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Process-wide device state shared by every GPU component
pub struct GpuContext {
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device_name: String,
    graphics_family: u32,
    graphics_queue: vk::Queue,
    transfer_family: u32,
    transfer_queue: vk::Queue,
    command_pool: vk::CommandPool,
    render_fence: vk::Fence,
    transfer_fence: vk::Fence,
    fence_wait: FenceWait,
    // Dropped after the handles above are destroyed in `Drop`, device before instance
    device: LogicalDevice,
    instance: VulkanInstance,
}

impl GpuContext {
    /// Create the context on the first enumerated physical device
    pub fn new(options: &ContextOptions) -> VulkanResult<Arc<Self>> {
        let instance = VulkanInstance::new(options)?;

        let physical_device = unsafe {
            instance.instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        }
        .into_iter()
        .next()
        .ok_or(VulkanError::NoPhysicalDevice)?;

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let memory_properties = unsafe {
            instance.instance.get_physical_device_memory_properties(physical_device)
        };
        let families = unsafe {
            instance.instance.get_physical_device_queue_family_properties(physical_device)
        };

        let (graphics_family, selected_transfer) = select_queue_families(&families)?;
        let transfer_family = upload_family(graphics_family, selected_transfer);

        log::info!(
            "Using Vulkan device {} (graphics family {}, transfer family {})",
            device_name, graphics_family, transfer_family
        );

        let priorities = [1.0_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_family)
            .queue_priorities(&priorities)
            .build()];
        // The planar encoder writes r8 storage images
        let supported = unsafe { instance.instance.get_physical_device_features(physical_device) };
        if supported.shader_storage_image_extended_formats == vk::FALSE {
            log::warn!("Device lacks shaderStorageImageExtendedFormats; planar output may fail");
        }
        let features = vk::PhysicalDeviceFeatures {
            shader_storage_image_extended_formats: supported.shader_storage_image_extended_formats,
            ..Default::default()
        };
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features);

        let device = LogicalDevice {
            device: unsafe {
                instance.instance.create_device(physical_device, &create_info, None)
                    .map_err(VulkanError::Api)?
            },
        };

        let graphics_queue = unsafe { device.device.get_device_queue(graphics_family, 0) };
        let transfer_queue = unsafe { device.device.get_device_queue(transfer_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family);
        let command_pool = unsafe {
            device.device.create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let fence_info = vk::FenceCreateInfo::builder();
        let fences = unsafe {
            device.device.create_fence(&fence_info, None).and_then(|render| {
                device.device.create_fence(&fence_info, None)
                    .map(|transfer| (render, transfer))
                    .map_err(|e| {
                        device.device.destroy_fence(render, None);
                        e
                    })
            })
        };
        let (render_fence, transfer_fence) = match fences {
            Ok(fences) => fences,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Arc::new(Self {
            physical_device,
            memory_properties,
            device_name,
            graphics_family,
            graphics_queue,
            transfer_family,
            transfer_queue,
            command_pool,
            render_fence,
            transfer_fence,
            fence_wait: options.fence_wait,
            device,
            instance,
        }))
    }

    /// Logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Selected physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Human-readable device name
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Transfer queue family index
    pub fn transfer_family(&self) -> u32 {
        self.transfer_family
    }

    /// Select a memory type on this device
    pub fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        super::memory::find_memory_type(&self.memory_properties, type_bits, required)
    }

    /// Allocate a primary command buffer from the shared pool
    pub fn allocate_command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe {
            self.device().allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        buffers.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no command buffer".to_string(),
        })
    }

    /// Return a command buffer to the shared pool
    pub fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device().free_command_buffers(self.command_pool, &[command_buffer]);
        }
    }

    /// Submit a render/compute command buffer and block on the render fence
    ///
    /// Returns the time spent waiting. The wait follows the configured
    /// [`FenceWait`] policy.
    pub fn submit_render(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<Duration> {
        self.submit_and_wait(self.graphics_queue, command_buffer, self.render_fence, self.fence_wait)
    }

    /// Submit an upload command buffer and block on the transfer fence
    pub fn submit_transfer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<Duration> {
        self.submit_and_wait(self.transfer_queue, command_buffer, self.transfer_fence, FenceWait::Unbounded)
    }

    fn submit_and_wait(
        &self,
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
        wait: FenceWait,
    ) -> VulkanResult<Duration> {
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device().queue_submit(queue, &[submit_info.build()], fence)
                .map_err(VulkanError::Api)?;
        }

        let stopwatch = Stopwatch::start();
        let waited = unsafe { self.device().wait_for_fences(&[fence], true, wait.as_nanos()) };
        let elapsed = stopwatch.elapsed();

        match waited {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                log::error!("Fence wait timed out after {:?}; the device is still busy", elapsed);
                return Err(VulkanError::Timeout { waited: elapsed });
            }
            Err(e) => return Err(VulkanError::Api(e)),
        }

        unsafe {
            self.device().reset_fences(&[fence]).map_err(VulkanError::Api)?;
        }
        Ok(elapsed)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let device = &self.device.device;
            let _ = device.device_wait_idle();
            device.destroy_fence(self.render_fence, None);
            device.destroy_fence(self.transfer_fence, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_family_for_graphics_and_transfer() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert_eq!(select_queue_families(&families).unwrap(), (0, 0));
    }

    #[test]
    fn test_first_advertising_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(select_queue_families(&families).unwrap(), (2, 0));
    }

    #[test]
    fn test_uploads_fall_back_to_graphics_family() {
        assert_eq!(upload_family(0, 2), 0);
        assert_eq!(upload_family(1, 1), 1);
    }

    #[test]
    fn test_missing_graphics_family() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert!(matches!(
            select_queue_families(&families),
            Err(VulkanError::NoQueueFamily("graphics"))
        ));
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        assert_eq!(select_queue_families(&families).unwrap(), (1, 1));
    }

    #[test]
    fn test_fence_wait_nanos() {
        assert_eq!(FenceWait::Unbounded.as_nanos(), u64::MAX);
        assert_eq!(FenceWait::Timeout(Duration::from_millis(2)).as_nanos(), 2_000_000);
    }

    #[test]
    fn test_options_follow_config() {
        let mut config = EngineConfig::default();
        config.debug.vulkan.validation = true;
        config.debug.vulkan.severity = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw();

        let options = ContextOptions::from_config(&config);
        assert!(options.validation);
        assert_eq!(options.severity, vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
        assert_eq!(options.message_type, vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION);
    }
}
