pub mod airspace;
pub mod drone;
pub mod snapshot;
