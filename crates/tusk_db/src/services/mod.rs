//! Services that sit beside the drivers.
//!
//! - `history` - HistoryRecorder and the SQLite-backed HistoryStore

pub mod history;

pub use history::{default_data_dir, init_data_dir, HistoryRecorder, HistoryStore};
