//! kubenlp Gateway Library
//!
//! This library provides the core functionality for the kubenlp gateway:
//! natural-language translation, verb policy, bounded subprocess execution
//! and the HTTP surface that ties them together.

pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod tools;
pub mod translator;
