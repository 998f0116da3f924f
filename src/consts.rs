/// Size of a single page on disk, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of a single fixed-width record slot, in bytes.
pub const RECORD_SIZE: usize = 100;

/// Number of record slots per page. The final `PAGE_SIZE % RECORD_SIZE`
/// bytes of every page are unused padding.
pub const RECORDS_PER_PAGE: usize = PAGE_SIZE / RECORD_SIZE;
