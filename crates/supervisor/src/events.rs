//! Lifecycle event callbacks (§4.5, §9). The source holds callbacks as
//! `shared_from_this`-captured closures over the supervisor itself; this
//! core replaces that with plain function pointers the caller registers
//! once at `Manager` construction, avoiding the ownership cycle.

use common::{ContainerId, Descriptor};

/// Fired after `StartContainer` succeeds and before `start` returns to its
/// caller (§5 "Ordering guarantees").
pub type StartedCallback = fn(Descriptor, &ContainerId);

/// Fired after postStop hooks run and before `destroy` (§5 "Ordering
/// guarantees"). `status` is the container's raw exit status.
pub type StoppedCallback = fn(Descriptor, &ContainerId, i32);
