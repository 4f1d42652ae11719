mod common;

use common::{buffer, Command, SimulatedDevice};
use penumbra::error::RenderError;
use penumbra::vulkan::{record_seed_copy, ResourceState, Tracked};

#[test]
fn seeded_bytes_land_in_the_target_and_become_unordered_access() {
    let device = SimulatedDevice::default();
    let upload = buffer(1);
    let data = (0..=255u8).collect::<Vec<_>>();
    device.fill(upload, &data);

    let mut target = Tracked::new("seeded", buffer(2), ResourceState::CopyDestination);
    device.register_buffer(&target);

    record_seed_copy(&device, upload, &mut target, data.len() as u64).unwrap();

    assert_eq!(device.faults(), Vec::<String>::new());
    assert_eq!(device.contents(buffer(2)), data);
    assert_eq!(target.state(), ResourceState::UnorderedAccess);
    assert_eq!(device.buffer_state(buffer(2)), Some(ResourceState::UnorderedAccess));

    // The copy is ordered before anything that reads the target.
    let commands = device.commands();
    assert_eq!(commands[0], Command::Copy { size: 256 });
    assert!(matches!(commands[1], Command::BufferBarriers(ref t) if t.len() == 1));
}

#[test]
fn target_holding_an_acceleration_structure_is_not_seeded() {
    let device = SimulatedDevice::default();
    let mut target = Tracked::new("bottom level", buffer(2), ResourceState::AccelerationStructure);

    let result = record_seed_copy(&device, buffer(1), &mut target, 64);

    assert!(matches!(
        result,
        Err(RenderError::StateMismatch {
            expected: ResourceState::CopyDestination,
            actual: ResourceState::AccelerationStructure,
            ..
        })
    ));
    assert!(device.commands().is_empty());
    assert_eq!(target.state(), ResourceState::AccelerationStructure);
}
