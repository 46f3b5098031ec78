pub mod config;
pub mod exec;
pub mod job;
pub mod models;
pub mod reporter;
pub mod runner;
pub mod session;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;
