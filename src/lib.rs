#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod controller;
pub mod data;
pub mod feed_api;
pub mod likes;
pub mod session;
pub mod storage;
pub mod video;
pub mod window;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use controller::{FeedEvent, FeedPhase, FeedWindowController};
pub use session::{FeedDataSource, Page, PageOutcome};
pub use video::VideoRecord;
