pub mod acceptance;
pub mod assembler;
pub mod config;
pub mod heuristics;
pub mod http;
pub mod markup;
pub mod model;
pub mod orchestrator;
pub mod repl;
pub mod session;
pub mod store;
pub mod types;
