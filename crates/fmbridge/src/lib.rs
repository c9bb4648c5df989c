pub mod boundary;
pub mod collector;
pub mod engine;
pub mod errors;
pub mod models;
pub mod normalize;
pub mod proxy;
pub mod schema;
pub mod session;
pub mod settings;
pub mod stream;
pub mod transcript;
