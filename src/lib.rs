#[macro_use]
extern crate tracing;

pub mod cmd;
pub mod constants;
pub mod errors;
pub mod events;
pub mod helm;
pub mod infrastructure;
pub mod io_models;
pub mod logger;
pub mod runtime;
pub mod services;
mod string;
pub mod utilities;
