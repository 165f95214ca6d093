pub mod agent;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gate;
pub mod processor;
pub mod scripted;
pub mod sink;
pub mod tagged_text;
pub mod tool_ui;
