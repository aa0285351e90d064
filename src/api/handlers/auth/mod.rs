//! Auth endpoints, request guards and shared state.

pub mod csrf;
pub mod login;
pub mod middleware;
pub mod password;
pub mod principal;
pub mod session;
pub mod signup;
pub mod state;
pub mod types;
pub mod utils;
pub mod verification;


pub use principal::{require_auth, Principal};
pub use state::{AuthConfig, AuthDeps, AuthState};
