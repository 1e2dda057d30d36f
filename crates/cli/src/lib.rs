//! pricewatch binary support
//!
//! Config loading, listener construction and console rendering around the
//! `pricewatch-feed` aggregator.

pub mod render;
pub mod settings;
pub mod sources;

pub use render::{format_table, render_loop};
pub use settings::load_config;
pub use sources::build_listeners;
