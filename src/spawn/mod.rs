//! Spawn lifecycle: who may create the local actor, when, and what happens to
//! any extra one that slips through

pub mod coordinator;
pub mod duplicates;
pub mod instantiate;
pub mod level;
pub mod scheduler;
