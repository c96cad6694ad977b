//! Chunk size selection based on available memory

/// Chunk size used when the available memory cannot be determined
pub const FALLBACK_CHUNK_SIZE: usize = 512 * 1024;

const GIB: u64 = 1024 * 1024 * 1024;

/// Upper bound (in whole GiB) and chunk size for each tier, in ascending order.
const TIERS: [(u64, usize); 10] = [
    (1, 64 * 1024),
    (2, 128 * 1024),
    (3, 256 * 1024),
    (4, 512 * 1024),
    (6, 512 * 1024),
    (8, 1024 * 1024),
    (12, 1024 * 1024),
    (16, 1536 * 1024),
    (24, 1536 * 1024),
    (32, 3 * 1024 * 1024),
];

/// Pick the chunk size for a job given the available memory in bytes.
///
/// `None` means the memory query failed, in which case the 512 KiB fallback is used.
/// Memory is counted in whole GiB (rounded down), so anything under 2 GiB lands
/// in the first tier.
pub fn advise(available_memory: Option<u64>) -> usize {
    let Some(bytes) = available_memory else {
        return FALLBACK_CHUNK_SIZE;
    };

    let gib = bytes / GIB;
    TIERS
        .iter()
        .find(|(limit, _)| gib <= *limit)
        .map(|(_, size)| *size)
        .unwrap_or(3 * 1024 * 1024)
}
