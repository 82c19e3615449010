//! Retrying request executor for the HTTP flavour of the API.

pub mod client;

pub use client::{Client, RestRequest};
