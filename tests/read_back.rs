mod common;

use common::{buffer, Command, SimulatedDevice};
use penumbra::error::RenderError;
use penumbra::vulkan::{record_read_back, ResourceState, Tracked};

#[test]
fn gpu_results_land_in_the_staging_buffer_for_the_host() {
    let device = SimulatedDevice::default();
    let results = (0..64u8).rev().collect::<Vec<_>>();

    let mut source = Tracked::new("shadow results", buffer(20), ResourceState::UnorderedAccess);
    let mut staging = Tracked::new("read back", buffer(21), ResourceState::UnorderedAccess);
    device.register_buffer(&source);
    device.register_buffer(&staging);
    device.fill(buffer(20), &results);

    record_read_back(&device, &mut source, &mut staging, results.len() as u64).unwrap();

    assert_eq!(device.faults(), Vec::<String>::new());
    assert_eq!(device.contents(buffer(21)), results);
    assert_eq!(staging.state(), ResourceState::HostRead);
    assert_eq!(device.buffer_state(buffer(21)), Some(ResourceState::HostRead));
    assert_eq!(source.state(), ResourceState::UnorderedAccess);
    assert_eq!(device.buffer_state(buffer(20)), Some(ResourceState::UnorderedAccess));

    let commands = device.commands();
    assert!(matches!(commands[0], Command::BufferBarriers(ref t) if t.len() == 2));
    assert_eq!(commands[1], Command::Copy { size: 64 });
    assert!(matches!(commands[2], Command::BufferBarriers(ref t) if t.len() == 2));
}

#[test]
fn staging_buffer_can_be_read_back_again() {
    let device = SimulatedDevice::default();
    let mut source = Tracked::new("results", buffer(20), ResourceState::UnorderedAccess);
    let mut staging = Tracked::new("read back", buffer(21), ResourceState::UnorderedAccess);
    device.register_buffer(&source);
    device.register_buffer(&staging);

    device.fill(buffer(20), &[1, 2, 3, 4]);
    record_read_back(&device, &mut source, &mut staging, 4).unwrap();
    device.fill(buffer(20), &[5, 6, 7, 8]);
    record_read_back(&device, &mut source, &mut staging, 4).unwrap();

    assert_eq!(device.faults(), Vec::<String>::new());
    assert_eq!(device.contents(buffer(21)), [5, 6, 7, 8]);
}

#[test]
fn acceleration_structure_memory_is_not_read_back() {
    let device = SimulatedDevice::default();
    let mut source = Tracked::new("top level", buffer(12), ResourceState::AccelerationStructure);
    let mut staging = Tracked::new("read back", buffer(21), ResourceState::UnorderedAccess);

    let result = record_read_back(&device, &mut source, &mut staging, 16);

    assert!(matches!(result, Err(RenderError::InvalidTransition { .. })));
    assert!(device.commands().is_empty());
    assert_eq!(staging.state(), ResourceState::UnorderedAccess);
}
