//! Virtual memory: address spaces, the physical core map, and executable
//! images.

pub mod address_space;
pub mod core_map;
pub mod executable;

pub use address_space::{AddressSpace, USER_STACK_SIZE};
pub use core_map::CoreMap;
pub use executable::Executable;
