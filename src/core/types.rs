/*!
 * Core Types
 * Common types used across the pipe subsystem
 */

/// Size type for buffer capacities and byte counts
pub type Size = usize;

/// Chain identifier, unique for the lifetime of the process
pub type ChainId = u64;
