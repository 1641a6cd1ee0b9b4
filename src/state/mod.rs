/// State management module
///
/// This module holds everything the kiosk knows about a scan:
/// - Shared data structures (data.rs)
/// - The scan database (library.rs)
/// - The capture → analysis → result state machine (workflow.rs)
/// - Per-scan enhancement join and persistence (join.rs)
/// - Stored scan listing and selection (history.rs)

pub mod data;
pub mod history;
pub mod join;
pub mod library;
pub mod workflow;
