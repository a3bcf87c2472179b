pub mod config;
pub mod error;
pub mod explore;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod rdata;
pub mod render;
pub mod store;
