//! Client side of the Revit add-in: transport plus the fixed capability set.

pub mod args;
mod capabilities;
mod transport;

pub use args::{WallSpec, WallTypeChange, WindowSpec};
pub use capabilities::{Capability, CapabilityError, CapabilityRegistry};
pub use transport::{HttpTransport, RemoteRequest, RemoteResponse, Transport};

#[cfg(test)]
pub use transport::MockTransport;
