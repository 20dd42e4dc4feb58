// Ingestion: validate -> dedup -> per-drone merge, driven by the poll
// scheduler. The sweeper prunes the dedup index on its own timer.

pub mod dedup;
pub mod pipeline;
pub mod scheduler;
pub mod sweeper;
pub mod validation;
