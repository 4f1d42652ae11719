use ash::vk;

use crate::vulkan::{CommandBuffer, Context, Fence, SemaphoreSubmitInfo};
use crate::PenumbraResult;

/// Per frame command recording resources, cycled round robin.
///
/// Every submission gets a serial. A frame slot remembers the serial of its
/// last submission so waiting on the slot's fence tells us which serials the
/// GPU has finished.
pub struct InFlightFrames {
    per_frames: Vec<PerFrame>,
    current_index: usize,
    next_serial: u64,
    completed_serial: u64,
}

struct PerFrame {
    command_buffer: CommandBuffer,
    fence: Fence,
    submitted_serial: u64,
}

impl InFlightFrames {
    pub(crate) fn new(context: &Context, frame_count: usize) -> PenumbraResult<Self> {
        assert!(frame_count > 0, "at least one frame in flight is needed");

        let per_frames = (0..frame_count)
            .map(|_| {
                let command_buffer = context
                    .command_pool
                    .allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)?;
                let fence = context.create_fence(Some(vk::FenceCreateFlags::SIGNALED))?;

                Ok(PerFrame {
                    command_buffer,
                    fence,
                    submitted_serial: 0,
                })
            })
            .collect::<PenumbraResult<Vec<_>>>()?;

        Ok(Self {
            per_frames,
            current_index: 0,
            next_serial: 1,
            completed_serial: 0,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.per_frames.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn completed_serial(&self) -> u64 {
        self.completed_serial
    }

    pub(crate) fn command_buffer(&self) -> &CommandBuffer {
        &self.per_frames[self.current_index].command_buffer
    }

    /// Waits until the GPU is done with the current slot and returns the
    /// highest serial known to be complete.
    pub(crate) fn begin_frame(&mut self) -> PenumbraResult<u64> {
        let frame = &self.per_frames[self.current_index];
        frame.fence.wait(None)?;
        frame.fence.reset()?;

        self.completed_serial = self.completed_serial.max(frame.submitted_serial);

        Ok(self.completed_serial)
    }

    /// Submits the current slot's command buffer and moves to the next slot.
    pub(crate) fn submit(
        &mut self,
        context: &Context,
        wait_semaphore: Option<SemaphoreSubmitInfo>,
        signal_semaphore: Option<SemaphoreSubmitInfo>,
    ) -> PenumbraResult<u64> {
        let serial = self.next_serial;
        self.next_serial += 1;

        let frame = &mut self.per_frames[self.current_index];
        context.graphics_queue.submit(
            &frame.command_buffer,
            wait_semaphore,
            signal_semaphore,
            &frame.fence,
        )?;
        frame.submitted_serial = serial;

        self.current_index = (self.current_index + 1) % self.per_frames.len();

        Ok(serial)
    }

    /// Records `executor` into a fresh command buffer, submits it and waits.
    pub(crate) fn submit_one_time<R, F>(
        &mut self,
        context: &Context,
        executor: F,
    ) -> PenumbraResult<(R, u64)>
    where
        F: FnOnce(&CommandBuffer) -> PenumbraResult<R>,
    {
        let serial = self.next_serial;
        self.next_serial += 1;

        let result = context.execute_one_time_commands(executor)?;
        self.completed_serial = self.completed_serial.max(serial);

        Ok((result, serial))
    }

    /// Blocks on every slot and returns the last submitted serial.
    pub(crate) fn wait_all(&mut self) -> PenumbraResult<u64> {
        for frame in &self.per_frames {
            frame.fence.wait(None)?;
            self.completed_serial = self.completed_serial.max(frame.submitted_serial);
        }

        Ok(self.completed_serial)
    }
}
