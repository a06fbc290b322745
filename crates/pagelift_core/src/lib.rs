//! Core library for pagelift, a one-off legacy-CMS content migration tool:
//! reads JSON-exported legacy records, maps them onto content-type schemas,
//! creates pages and content items in a local SQLite store, downloads and
//! deduplicates referenced images, rewrites inline images into embed
//! markers, and records redirects from legacy URL paths.

pub mod config;
pub mod error;
pub mod formatter;
pub mod images;
pub mod importer;
pub mod migrate;
pub mod richtext;
pub mod runtime;
pub mod slugs;
pub mod store;
pub mod text;
