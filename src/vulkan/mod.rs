pub extern crate ash;
pub extern crate gpu_allocator;

mod buffer;
mod command;
mod context;
mod descriptor;
pub mod descriptor_heap;
mod device;
mod device_local;
mod entry;
mod image;
mod instance;
pub mod physical_device;
mod pipeline;
mod queue;
mod ray_tracing;
mod recorder;
mod ring_buffer;
mod shader;
mod state;
mod sync;

pub mod utils;

pub use buffer::*;
pub use command::*;
pub use context::Context;
pub use descriptor::*;
pub use device::*;
pub use device_local::*;
pub use image::*;
pub use pipeline::*;
pub use queue::*;
pub use ray_tracing::*;
pub use recorder::*;
pub use ring_buffer::*;
pub use shader::*;
pub use state::*;
pub use sync::*;
