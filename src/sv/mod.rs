pub mod build_info;
pub mod channels;
pub mod cli;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod event_loop;
pub mod events;
pub mod launcher;
pub mod notify;
pub mod reaper;
pub mod service;
pub mod status;
pub mod supervisor;
pub mod svctl_cli;
pub mod svdir;

#[cfg(test)]
mod mock;
