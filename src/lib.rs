// Library for tests to access modules

pub mod aggregator;
pub mod config;
pub mod hub;
pub mod models;
pub mod routes;
pub mod sampler;
pub mod settings;
pub mod sources;
pub mod version;
