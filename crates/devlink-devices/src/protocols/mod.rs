/*!
 * Transport implementations for devlink.
 */

pub mod memory;

pub use memory::MemoryTransport;
