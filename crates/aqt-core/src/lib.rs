//! AQT Core Library
//!
//! Platform-free logic for the AQT browser extension: hiding page elements on
//! the video site, holding the player to a chosen playback speed, and
//! enforcing daily per-domain time limits.
//!
//! # Architecture
//!
//! Each execution context of the extension owns long-lived component
//! instances with explicit `initialize`/`destroy` lifecycles. The browser is
//! reached only through the traits in [`dom`], [`storage`] and [`tracker`],
//! so the same components run against `web-sys` in the wasm crate and
//! against the in-memory implementations in tests and the CLI.
//!
//! # Modules
//!
//! - `domain`: URL host extraction, domain normalization and suffix matching
//! - `page`: URL to page-type classification
//! - `types`: Shared type definitions and storage keys
//! - `catalog`: Built-in default element rules
//! - `storage`: Persisted key/value access and default merging
//! - `dom`: Page surface traits and the in-memory page model
//! - `engine`: Element reconciliation engine
//! - `handlers`: Rule-specific side effects beyond CSS
//! - `playback`: Playback speed enforcement
//! - `overlay`: Speed widget and block overlay state
//! - `tracker`: Background time-limit tracker
//! - `limits`: Time-limit list editing
//! - `config`: Component timing and tolerance settings

pub mod catalog;
pub mod config;
pub mod dom;
pub mod domain;
pub mod engine;
pub mod handlers;
pub mod limits;
pub mod overlay;
pub mod page;
pub mod playback;
pub mod storage;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ContentConfig, TrackerConfig};
pub use domain::{get_domain_from_url, matches_domain, normalize_domain};
pub use engine::ElementManager;
pub use page::get_page_type;
pub use playback::SpeedEnforcer;
pub use storage::{merge_with_defaults, MemoryStorage, Storage, StorageError};
pub use tracker::{ActiveTab, Clock, SystemClock, TabHost, TimeLimitTracker};
pub use types::{BlockSignal, DailyUsage, ElementRule, PageMask, PageType, RuleCategory, TimeLimit};
