/// Recovers jobs owned by workers that never acknowledged them.
pub mod fetched_jobs;
/// Prunes `succeeded`/`deleted` list entries whose job hash has expired.
pub mod expired_jobs;
