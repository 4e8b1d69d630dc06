pub mod action;
pub mod dependencies;
pub mod helm_charts;
pub mod infrastructure_context;
pub mod models;
pub mod network;
pub mod registry;
pub mod update;
pub mod workload;
