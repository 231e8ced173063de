pub mod commands;
pub mod config;
pub mod convert;
pub mod events;
pub mod gate;
pub mod item;
pub mod processor;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod store;
