pub mod destination;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod source;
pub mod supervisor;
