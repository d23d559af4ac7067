pub mod lifecycle_service;
pub mod object_store;
pub mod reclaimer;
pub mod retention_policy;
pub mod short_link;
pub mod storage_service;
pub mod sweeper;
pub mod timed_store;
