//! HTML scraping layer (C4-C7): the typed DOM-query components that replace dynamic-typing
//! HTML walking with `scraper`-backed selectors and compiled `regex` fallbacks.

pub mod homework;
pub mod offsets;
pub mod week;

pub use week::WeekScrapeResult;
