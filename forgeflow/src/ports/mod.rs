//! TCP port allocation for supervised services.

mod allocator;

pub use allocator::{BindProbe, PortAllocator, PortLease, PortProbe, PortRange};
