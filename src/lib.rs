//! Authenticator - password, TOTP and session service
//!
//! This library provides the core functionality for the authenticator binary.
//! It exposes all modules for testing purposes.

pub mod accounts;
pub mod auth;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod qr;
pub mod session;
pub mod settings;
pub mod storage;
pub mod tokens;
pub mod totp;
pub mod web;
