//! Operator HTTP API: registry views, on-demand scrapes, batch triggers and postings.

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
