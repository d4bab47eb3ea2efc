pub mod auth;
pub mod engine;

pub use auth::MasterKeyAuth;
pub use engine::{ChatCall, ChatEngine, ChatSession};
