pub mod cascade;
pub mod catalog;
pub mod copy;
pub mod core;
pub mod grid;
pub mod settings;
