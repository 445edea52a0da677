//! The container lifecycle manager (§4.5): the global container table, the
//! descriptor allocator, the start/stop/pause/resume/exec entry points and
//! their rollback paths (`manager`), the live per-container record
//! (`container`), and the reaper thread that observes OCI-runtime
//! processes exit and drives post-stop/restart/teardown (`reaper`).

pub mod container;
pub mod descriptor;
pub mod events;
pub mod manager;
pub mod reaper;

pub use container::{Container, LifecycleState, RestartPolicy};
pub use descriptor::DescriptorAllocator;
pub use events::{StartedCallback, StoppedCallback};
pub use manager::{Manager, StartOrigin, StartRequest};
