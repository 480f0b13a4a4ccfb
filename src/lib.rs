pub mod api;
pub mod cache;
pub mod config;
pub mod cookies;
pub mod error;
pub mod extractor;
pub mod headers;
pub mod library;
pub mod models;
pub mod platforms;
pub mod proxy_manager;
pub mod url_parser;

pub use error::{ExtractorError, Result};
pub use extractor::{ExtractorOptions, MediaExtractor};
pub use models::{ExtractedMedia, Platform, Quality, VideoInfo};
