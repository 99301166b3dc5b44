// Logger initialization. Builds an env_logger filter string from the
// configuration's per-module/default log levels, playing the role of the
// original's log_printf dispatch table (see SPEC_FULL.md §10.2).

use crate::config::Configuration;

pub fn init(config: &Configuration) {
    let mut builder = env_logger::Builder::new();
    let base = config.default_log_level.map(|l| l.to_log_level_filter()).unwrap_or(log::LevelFilter::Warn);
    builder.filter_level(base);
    for (module, level) in &config.log_levels {
        builder.filter_module(module, level.to_log_level_filter());
    }
    let _ = builder.try_init();
}
