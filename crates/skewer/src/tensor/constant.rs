/// # Constants with reserved meanings in Skewer

/// In a batched tensor shape, Skewer reserves the `0th` dimension for batching
pub const BATCH_DIM: usize = 0;

/// In a token tensor shape, Skewer reserves the `1st` dimension for sequence
pub const SEQ_DIM: usize = 1;
