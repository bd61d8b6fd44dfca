//! Infrastructure layer: external engine processes, batch scheduling and the result store.

pub mod jobs;
pub mod results;
