//! Core module - configuration, events, and settings collaborators

pub mod config;
pub mod events;
pub mod settings;
