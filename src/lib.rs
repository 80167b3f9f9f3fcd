// Library for tests to access modules

pub mod aggregator;
pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod maintenance;
pub mod models;
pub mod prpc_client;
pub mod reconciler;
pub mod registry_repo;
pub mod routes;
pub mod snapshot_repo;
pub mod store;
pub mod telemetry_repo;
pub mod version;
pub mod views;
pub mod worker;
