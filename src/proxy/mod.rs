pub mod admin;
pub mod handlers;
pub mod mappers;
pub mod middleware;
pub mod server;
pub mod signature_cache;
pub mod state;
pub mod stream;
#[cfg(test)]
mod tests;
pub mod token;
pub mod upstream;
pub mod variant;

pub use signature_cache::SignatureCache;
pub use state::AppState;
pub use variant::Variant;
