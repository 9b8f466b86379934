//! Token authentication.

pub mod jwt;

pub use jwt::{JwtAuthenticator, sign_token};
