pub mod bezier;
pub mod config;
pub mod figure;
pub mod flows;
pub mod heatmap;
pub mod month;
pub mod output;
pub mod palette;
pub mod transit;
pub mod trips;
pub mod zones;
