pub mod config;
pub mod roots;
pub mod state;
pub mod threads;
