pub mod api;
pub mod auth;
pub mod block;
pub mod browser;
pub mod checkpoint;
pub mod config;
pub mod consent;
pub mod control;
pub mod dataset;
pub mod db;
pub mod enrich;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod mailcheck;
pub mod mining;
pub mod models;
pub mod orchestrator;
pub mod pacing;
pub mod phase;
pub mod retry;
pub mod session;
pub mod stealth;
