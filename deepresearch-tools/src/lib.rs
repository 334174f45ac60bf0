//! # DeepResearch Tools
//!
//! Built-in capabilities for the section research agent: web search and
//! page fetching, packaged as the search provider.

pub mod html;
pub mod provider;
pub mod web;

pub use provider::WebProvider;
pub use web::{WebFetchCapability, WebSearchCapability};
