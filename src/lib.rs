//! Bilateral tariff set resolution.
//!
//! For every requested year window, each importer's rate on each product
//! from each exporter is resolved: the bilateral preferential (PRF) rate when
//! one was published, otherwise the importer's most-favored-nation (MFN)
//! rate, expanded to every partner in the concordance.
//!
//! Pipeline per window: [`select`] → [`resolve`] → [`merge`], driven by
//! [`engine::run`].

pub mod archive;
pub mod concordance;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod output;
pub mod parser;
pub mod resolve;
pub mod select;

pub use error::{Result, TariffError};
pub use tariff_types as types;
