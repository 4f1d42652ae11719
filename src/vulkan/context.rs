use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings,
};

use crate::vulkan::device::Device;
use crate::vulkan::entry::Entry;
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::{PhysicalDevice, REQUIRED_DEVICE_EXTENSIONS};
use crate::vulkan::queue::Queue;
use crate::vulkan::{CommandBuffer, CommandPool, RayTracingContext};
use crate::RendererConfig;

pub const DEBUG_GPU_ALLOCATOR: bool = false;

/// Headless device context. Presentation is the caller's business.
pub struct Context {
    pub allocator: Arc<Mutex<Allocator>>,
    pub command_pool: CommandPool,
    pub ray_tracing: Arc<RayTracingContext>,
    pub graphics_queue: Queue,
    pub device: Arc<Device>,
    pub physical_device: PhysicalDevice,
    pub instance: Instance,
    _entry: Entry,
}

impl Context {
    pub fn new(config: &RendererConfig) -> Result<Self> {
        let entry = Entry::new()?;
        let instance = Instance::new(&entry, config)?;

        let physical_device = instance.select_suitable_physical_device(config)?;

        let device = Arc::new(Device::new(
            &instance,
            &physical_device,
            &REQUIRED_DEVICE_EXTENSIONS,
        )?);

        let graphics_queue = device.get_queue(physical_device.graphics_queue_family.index, 0);

        let ray_tracing = Arc::new(RayTracingContext::new(&instance, &physical_device, &device));
        log::debug!(
            "Ray tracing pipeline properties {:#?}",
            ray_tracing.pipeline_properties
        );
        log::debug!(
            "Acceleration structure properties {:#?}",
            ray_tracing.acceleration_structure_properties
        );

        let command_pool = CommandPool::new(
            device.clone(),
            ray_tracing.clone(),
            physical_device.graphics_queue_family,
            Some(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
        )?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.inner.clone(),
            device: device.inner.clone(),
            physical_device: physical_device.inner,
            debug_settings: AllocatorDebugSettings {
                log_allocations: DEBUG_GPU_ALLOCATOR,
                log_frees: DEBUG_GPU_ALLOCATOR,
                log_memory_information: DEBUG_GPU_ALLOCATOR,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            command_pool,
            ray_tracing,
            graphics_queue,
            device,
            physical_device,
            instance,
            _entry: entry,
        })
    }
}

impl Context {
    pub fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.device_wait_idle()? };

        Ok(())
    }

    /// Records `executor` into a fresh command buffer, submits it and waits.
    ///
    /// When `executor` fails the recording is freed without ever reaching the queue.
    pub fn execute_one_time_commands<R, F: FnOnce(&CommandBuffer) -> Result<R>>(
        &self,
        executor: F,
    ) -> Result<R> {
        run_one_time(self, executor)
    }
}

/// The device side of a one time submission.
pub(crate) trait OneTimeSubmit {
    type Commands;

    fn begin(&self) -> Result<Self::Commands>;

    fn submit_and_wait(&self, commands: &Self::Commands) -> Result<()>;

    fn free(&self, commands: Self::Commands) -> Result<()>;
}

impl OneTimeSubmit for Context {
    type Commands = CommandBuffer;

    fn begin(&self) -> Result<CommandBuffer> {
        let command_buffer = self
            .command_pool
            .allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)?;

        if let Err(err) = command_buffer.begin(Some(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)) {
            self.command_pool.free_command_buffer(&command_buffer)?;
            return Err(err);
        }

        Ok(command_buffer)
    }

    fn submit_and_wait(&self, command_buffer: &CommandBuffer) -> Result<()> {
        command_buffer.end()?;

        let fence = self.create_fence(None)?;
        self.graphics_queue
            .submit(command_buffer, None, None, &fence)?;
        fence.wait(None)
    }

    fn free(&self, command_buffer: CommandBuffer) -> Result<()> {
        self.command_pool.free_command_buffer(&command_buffer)
    }
}

pub(crate) fn run_one_time<S, R, F>(submitter: &S, executor: F) -> Result<R>
where
    S: OneTimeSubmit,
    F: FnOnce(&S::Commands) -> Result<R>,
{
    let commands = submitter.begin()?;

    // Resources the executor created are already gone on failure, so the
    // commands referencing them must not execute.
    let result = executor(&commands);
    match &result {
        Ok(_) => submitter.submit_and_wait(&commands)?,
        Err(err) => log::warn!("Discarding one time commands: {err:#}"),
    }
    submitter.free(commands)?;

    result
}

pub(crate) fn lock_allocator(allocator: &Mutex<Allocator>) -> Result<MutexGuard<'_, Allocator>> {
    allocator
        .lock()
        .map_err(|_| anyhow!("GPU allocator lock is poisoned"))
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use anyhow::bail;

    use super::*;

    #[derive(Default)]
    struct CountingSubmitter {
        recorded: RefCell<Vec<&'static str>>,
        submitted: Cell<usize>,
        freed: Cell<usize>,
    }

    impl OneTimeSubmit for CountingSubmitter {
        type Commands = RefCell<Vec<&'static str>>;

        fn begin(&self) -> Result<Self::Commands> {
            Ok(RefCell::default())
        }

        fn submit_and_wait(&self, commands: &Self::Commands) -> Result<()> {
            self.submitted.set(self.submitted.get() + 1);
            self.recorded.borrow_mut().extend(commands.borrow().iter());
            Ok(())
        }

        fn free(&self, _commands: Self::Commands) -> Result<()> {
            self.freed.set(self.freed.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn successful_recording_is_submitted_and_freed() {
        let submitter = CountingSubmitter::default();

        let value = run_one_time(&submitter, |commands| {
            commands.borrow_mut().push("copy");
            Ok(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(submitter.submitted.get(), 1);
        assert_eq!(submitter.freed.get(), 1);
        assert_eq!(*submitter.recorded.borrow(), vec!["copy"]);
    }

    #[test]
    fn failed_recording_is_freed_without_submitting() {
        let submitter = CountingSubmitter::default();

        let result: Result<()> = run_one_time(&submitter, |commands| {
            commands.borrow_mut().push("copy");
            bail!("second mesh is empty")
        });

        assert!(result.is_err());
        assert_eq!(submitter.submitted.get(), 0);
        assert_eq!(submitter.freed.get(), 1);
        assert!(submitter.recorded.borrow().is_empty());
    }
}
