//! Parameter Allocator (C3) and Frame Planner (C4).

pub mod frame;
pub mod params;

pub use frame::{plan, FramePlan, RegisterSaveArea};
pub use params::{allocate, CallerRequirements, FunctionDescriptor, ParameterLocation};
