#![doc = "Core-voltage control and dual-unit overclock stress runner for the RP2040."]

pub mod affinity;
pub mod bench;
pub mod clock;
pub mod coordinator;
pub mod devmem;
pub mod latch;
pub mod register;
pub mod sensors;
pub mod telemetry;
pub mod workload;

pub use affinity::*;
pub use bench::*;
pub use clock::*;
pub use coordinator::*;
pub use devmem::DevMemRegister;
pub use latch::*;
pub use register::*;
pub use sensors::*;
pub use telemetry::*;
pub use workload::*;
