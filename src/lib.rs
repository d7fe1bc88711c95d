pub mod config;
pub mod history;
pub mod mln;
pub mod pipeline;
pub mod resolve;
