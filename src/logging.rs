use log::LevelFilter;

pub fn parse_level(level: &str) -> Option<LevelFilter> {
    level.trim().parse().ok()
}

pub fn init(level: &str) -> Result<(), log::SetLoggerError> {
    let parsed = parse_level(level);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} {}: {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(parsed.unwrap_or(LevelFilter::Info))
        .level_for("hyper", LevelFilter::Warn)
        .level_for("mio", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;

    if parsed.is_none() {
        log::warn!("Unknown log level {:?}, using info", level);
    }
    Ok(())
}
