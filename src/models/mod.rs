mod account;
mod config;

pub use account::{Account, AccountView};
pub use config::{
    apply_env_overrides, validate, AppConfig, RotationConfig, RotationStrategy,
    SignatureCacheConfig,
};
