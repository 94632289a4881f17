use fmha::FmhaError;
use fmha_config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Kernel(#[from] FmhaError),
    /// No instantiation is built for this combination.
    #[error("run '{0}': {1}")]
    NoInstance(String, String),
}
