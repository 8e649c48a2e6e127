pub mod auth;

pub use auth::{session_auth_middleware, AdminSession, AuthSession};
