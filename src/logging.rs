use log::LevelFilter;

/// Installs `env_logger` as the global logger.
///
/// `level` is the default filter; `RUST_LOG` overrides it. Calling this more than once is
/// harmless, later calls are ignored.
pub fn init(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init(LevelFilter::Debug);
        init(LevelFilter::Warn);
        log::debug!("logger installed");
    }
}
