#![deny(clippy::unwrap_used)]

pub mod alert;
pub mod catalogue;
pub mod category;
pub mod config;
pub mod control;
pub mod facets;
pub mod product;
pub mod review;
pub mod search;
pub mod tracking;
