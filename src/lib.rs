//! Dietary amino acid tracking: idempotent batch ingestion of nutrition data
//! into a relational store, and conversion/recommendation over that store.

#[macro_use]
extern crate diesel;

pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod query;
pub mod resolver;
pub mod routes;
pub mod schema;
pub mod scoring;
pub mod store;
pub mod usda;

pub use error::{Error, Result};
