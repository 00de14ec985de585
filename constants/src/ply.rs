/// Upper bound on the header scan before a file is rejected (bytes)
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Header terminator line
pub const END_HEADER: &[u8] = b"end_header";

/// Vertex records decoded between cancellation checks
pub const CANCEL_CHECK_RECORDS: usize = 65_536;
