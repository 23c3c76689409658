//! Built-in feature plugins.

pub mod history;

pub use history::HistoryFeature;
