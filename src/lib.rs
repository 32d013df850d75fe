pub mod atom;
pub mod bucket;
pub mod changelog;
pub mod cli;
pub mod config;
mod ext;
pub mod file_event_produce;
pub mod foreman;
pub mod release;
pub mod upload;
