mod config;
mod pipeline;
