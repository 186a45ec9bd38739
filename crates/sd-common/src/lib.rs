pub mod config;

pub use config::{EnvConfig, load_json_or_default};
