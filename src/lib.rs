// src/lib.rs

//! Radiology normal values: measurement records, search and admin tooling

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod form;
pub mod guard;
pub mod models;
pub mod search;
pub mod services;
pub mod storage;
pub mod utils;
pub mod views;

#[cfg(test)]
mod testing;
