//! Built-in defaults, the lowest layer of every load.

use crate::refinement::{DEFAULT_APPROVAL_KEY, DEFAULT_FEEDBACK_KEY, DEFAULT_ITERATION_KEY};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Create a Config builder with the runtime defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default(
            "runtime.default_max_iterations",
            i64::from(DEFAULT_MAX_ITERATIONS),
        )?
        .set_default("runtime.approval_key", DEFAULT_APPROVAL_KEY)?
        .set_default("runtime.feedback_key", DEFAULT_FEEDBACK_KEY)?
        .set_default("runtime.iteration_key", DEFAULT_ITERATION_KEY)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
