// This file is part of the NVR core recording pipeline.
// Adapted from Moonfire NVR's `base` crate (clock/shutdown/tracing setup).

pub mod clock;
pub mod shutdown;
pub mod tracing_setup;
