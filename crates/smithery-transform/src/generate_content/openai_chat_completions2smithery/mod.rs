pub mod request;
pub mod stream;
