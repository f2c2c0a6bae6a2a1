pub mod quote;
pub mod service;
pub mod settings;
