pub extern crate anyhow;
pub extern crate glam;
pub extern crate log;

pub mod deferred;
pub mod error;
pub mod frame;
pub mod in_flight_frames;
pub mod logger;
pub mod scene;
pub mod vulkan;

use std::path::PathBuf;

use ash::vk;
use glam::{UVec2, Vec3};
use log::info;

use crate::deferred::DeferredReleaseQueue;
use crate::frame::{FrameInputs, FrameOrchestrator};
use crate::in_flight_frames::InFlightFrames;
use crate::scene::{MeshData, ShadowScene};
use crate::vulkan::{Context, ImageHandle, PendingUpload, SemaphoreSubmitInfo, Semaphore, Tracked};

pub type PenumbraResult<V> = anyhow::Result<V>;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum FeatureValue {
    NotUsed,
    Wanted,
    Needed,
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub name: String,
    pub output_size: UVec2,
    pub frames_in_flight: usize,

    pub validation_layers: FeatureValue,

    pub shadow_format: vk::Format,
    pub hdr_format: vk::Format,
    pub depth_format: vk::Format,
    /// Format of the images handed in as back buffers.
    pub back_buffer_format: vk::Format,

    /// Directory holding the compiled SPIR-V modules.
    pub shader_dir: PathBuf,

    /// Translation of the single scene instance in the top level structure.
    pub instance_translation: Vec3,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            name: "penumbra".to_owned(),
            output_size: UVec2::new(1280, 720),
            frames_in_flight: 2,
            validation_layers: FeatureValue::Wanted,
            shadow_format: vk::Format::R8G8B8A8_UNORM,
            hdr_format: vk::Format::R16G16B16A16_SFLOAT,
            depth_format: vk::Format::D32_SFLOAT,
            back_buffer_format: vk::Format::B8G8R8A8_UNORM,
            shader_dir: PathBuf::from("shaders"),
            instance_translation: Vec3::new(0.0, 0.0, 3.0),
        }
    }
}

/// The hybrid renderer: owns the device, the scene resources and the frame loop.
///
/// Field order is drop order: everything holding GPU memory goes before the context.
pub struct Renderer {
    pub frames_rendered: u64,

    orchestrator: FrameOrchestrator,
    scene: ShadowScene,
    uploads: DeferredReleaseQueue<PendingUpload>,
    in_flight_frames: InFlightFrames,
    pub context: Context,
}

impl Renderer {
    pub fn new(config: &RendererConfig, meshes: &[MeshData]) -> PenumbraResult<Self> {
        let context = Context::new(config)?;
        let mut in_flight_frames = InFlightFrames::new(&context, config.frames_in_flight)?;
        let mut uploads = DeferredReleaseQueue::new();

        // All init work is one submission; its uploads retire with it.
        let ((scene, orchestrator, pending), serial) =
            in_flight_frames.submit_one_time(&context, |cmd| {
                let (scene, pending) = ShadowScene::new(&context, config, meshes, cmd)?;
                let orchestrator = FrameOrchestrator::new(&context, config, &scene, cmd)?;
                Ok((scene, orchestrator, pending))
            })?;
        for upload in pending {
            uploads.retire(serial, upload);
        }

        info!("Renderer initialized with {} meshes", meshes.len());

        Ok(Self {
            frames_rendered: 0,
            orchestrator,
            scene,
            uploads,
            in_flight_frames,
            context,
        })
    }

    /// Records and submits one frame.
    ///
    /// `back_buffer` must be in the `Present` state and is returned there. The
    /// presentation collaborator owns the swapchain and both semaphores.
    pub fn render(
        &mut self,
        inputs: &FrameInputs,
        back_buffer: &mut Tracked<ImageHandle>,
        image_available: &Semaphore,
        render_finished: &Semaphore,
    ) -> PenumbraResult<()> {
        let completed = self.in_flight_frames.begin_frame()?;
        self.uploads.release_completed(completed);

        let frame = self.in_flight_frames.current_index();
        self.orchestrator.write_constants(frame, inputs);

        let command_buffer = self.in_flight_frames.command_buffer();
        command_buffer.reset()?;
        command_buffer.begin(None)?;
        self.orchestrator
            .record(command_buffer, frame, inputs, &self.scene, back_buffer)?;
        command_buffer.end()?;

        self.in_flight_frames.submit(
            &self.context,
            Some(SemaphoreSubmitInfo {
                semaphore: image_available,
                stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            }),
            Some(SemaphoreSubmitInfo {
                semaphore: render_finished,
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            }),
        )?;

        self.frames_rendered += 1;

        Ok(())
    }

    /// Replaces the scene geometry and rebuilds both acceleration structure levels.
    pub fn rebuild_scene(&mut self, meshes: &[MeshData]) -> PenumbraResult<()> {
        self.context.device_wait_idle()?;
        let completed = self.in_flight_frames.wait_all()?;
        self.uploads.release_completed(completed);

        let context = &self.context;
        let scene = &mut self.scene;
        let (pending, serial) = self
            .in_flight_frames
            .submit_one_time(context, |cmd| scene.replace_meshes(context, meshes, cmd))?;
        for upload in pending {
            self.uploads.retire(serial, upload);
        }

        self.orchestrator.bind_scene(&self.scene);

        Ok(())
    }

    pub fn scene(&self) -> &ShadowScene {
        &self.scene
    }

    pub fn wait_idle(&mut self) -> PenumbraResult<()> {
        self.context.device_wait_idle()?;
        let completed = self.in_flight_frames.wait_all()?;
        self.uploads.release_completed(completed);

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.context.device_wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {err}");
        }
    }
}
