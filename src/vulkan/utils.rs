use anyhow::Result;

/// Rounds `size` up to the next multiple of `alignment`.
///
/// `alignment` must be non zero. It does not have to be a power of two.
pub fn compute_aligned_size(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    size.div_ceil(alignment) * alignment
}

/// Hands `resource` back next to the value of `result`, or releases it when `result` failed.
///
/// For handles created before a call that can still fail.
pub fn keep_or_release<T, E, R>(
    result: std::result::Result<T, E>,
    resource: R,
    release: impl FnOnce(R),
) -> std::result::Result<(T, R), E> {
    match result {
        Ok(value) => Ok((value, resource)),
        Err(err) => {
            release(resource);
            Err(err)
        }
    }
}

pub fn read_shader_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(ash::util::read_spv(&mut cursor)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_size_rounds_up_to_the_next_multiple() {
        assert_eq!(compute_aligned_size(1, 256), 256);
        assert_eq!(compute_aligned_size(256, 256), 256);
        assert_eq!(compute_aligned_size(257, 256), 512);
        assert_eq!(compute_aligned_size(0, 64), 0);
        assert_eq!(compute_aligned_size(10, 12), 12);
    }

    #[test]
    fn failed_call_releases_the_resource() {
        let mut released = vec![];

        let result: std::result::Result<((), u64), &str> =
            keep_or_release(Err("bind failed"), 42, |handle| released.push(handle));

        assert_eq!(result, Err("bind failed"));
        assert_eq!(released, [42]);
    }

    #[test]
    fn successful_call_keeps_the_resource() {
        let mut released = vec![];

        let result = keep_or_release(Ok::<_, ()>("handles"), 42, |handle| released.push(handle));

        assert_eq!(result, Ok(("handles", 42)));
        assert!(released.is_empty());
    }

    #[test]
    fn spirv_with_a_broken_length_is_rejected() {
        assert!(read_shader_from_bytes(&[0x03, 0x02, 0x23]).is_err());
    }
}
