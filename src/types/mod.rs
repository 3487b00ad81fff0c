/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are shared by every component of the replication engine: identifiers, list versions,
//! and the values carried inside commands.
//!
//! Types specific to a single component (for example the pending command log of the list repairer)
//! live in that component's module.

pub mod data_types;

pub mod values;

pub use data_types::{ListVersion, ObjectId, PeerId, Role, VersionId};
pub use values::{SimpleValue, Value};
