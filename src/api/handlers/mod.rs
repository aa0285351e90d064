//! API handlers.
//!
//! [`auth`] holds the signup/login/session flows together with the request guards
//! and state they share; [`me`] and [`health`] are thin read endpoints on top.

pub mod auth;
pub mod health;
pub mod me;
