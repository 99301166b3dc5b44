// Command-line configuration. Grounded on original_source/main.c's flag
// loop and its `log_str`/`level_str` tables, reworked as a `?`-propagating
// parser instead of `exit()`-on-error deep in argument handling (§10.1).

use std::path::PathBuf;

use crate::error::EmulatorError;

/// The eight logging sources named in the original's `LOG_SRC_*` table.
pub const LOG_MODULES: &[&str] = &["uart", "csr", "mbus", "mapper", "scsi", "ramrom", "rtc", "emu", "strace"];
pub const LOG_LEVELS: &[&str] = &["err", "warn", "notice", "info", "debug"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Err,
    Warn,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    fn parse(s: &str) -> Result<Self, EmulatorError> {
        match s {
            "err" => Ok(LogLevel::Err),
            "warn" => Ok(LogLevel::Warn),
            "notice" => Ok(LogLevel::Notice),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(EmulatorError::UnknownLogLevel(other.to_string())),
        }
    }

    /// Maps the original's five-level scheme onto `log`'s four built-in
    /// levels: `notice` folds into `Warn`, one rung below `err`'s `Error`.
    pub fn to_log_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Err => log::LevelFilter::Error,
            LogLevel::Warn | LogLevel::Notice => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub u17_path: PathBuf,
    pub u15_path: PathBuf,
    pub hd_path: PathBuf,
    pub rtc_ram_path: Option<PathBuf>,
    pub cow_dir: Option<PathBuf>,
    pub mem_size: u32,
    pub realtime: bool,
    pub strict_mapper: bool,
    pub syscall_trace: bool,
    pub log_levels: Vec<(String, LogLevel)>,
    pub default_log_level: Option<LogLevel>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            u17_path: PathBuf::from("u17.rom"),
            u15_path: PathBuf::from("u15.rom"),
            hd_path: PathBuf::from("hd.img"),
            rtc_ram_path: None,
            cow_dir: None,
            mem_size: 2 * 1024 * 1024,
            realtime: false,
            strict_mapper: false,
            syscall_trace: false,
            log_levels: Vec::new(),
            default_log_level: None,
        }
    }
}

fn usage() -> String {
    format!(
        "usage: plexus20 [-u15 path] [-u17 path] [-hd path] [-r] [-m 1|2|4|8] \
         [-c dir] [-y] [-t] [-l module=level | -l level]\n  modules: {}\n  levels: {}",
        LOG_MODULES.join(","),
        LOG_LEVELS.join(",")
    )
}

impl Configuration {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, EmulatorError> {
        let mut config = Configuration::default();
        let mut iter = args.into_iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-u15" => config.u15_path = PathBuf::from(Self::next_value(&mut iter, "-u15")?),
                "-u17" => config.u17_path = PathBuf::from(Self::next_value(&mut iter, "-u17")?),
                "-hd" => config.hd_path = PathBuf::from(Self::next_value(&mut iter, "-hd")?),
                "-r" => config.realtime = true,
                "-y" => config.strict_mapper = true,
                "-t" => config.syscall_trace = true,
                "-m" => {
                    let value = Self::next_value(&mut iter, "-m")?;
                    let mib: u32 = value.parse().map_err(|_| EmulatorError::InvalidMemorySize(0))?;
                    if !matches!(mib, 1 | 2 | 4 | 8) {
                        return Err(EmulatorError::InvalidMemorySize(mib));
                    }
                    config.mem_size = mib * 1024 * 1024;
                }
                "-c" => config.cow_dir = Some(PathBuf::from(Self::next_value(&mut iter, "-c")?)),
                "-l" => {
                    let value = Self::next_value(&mut iter, "-l")?;
                    Self::parse_log_spec(&value, &mut config)?;
                }
                other => return Err(EmulatorError::UnknownArgument(other.to_string())),
            }
        }
        Ok(config)
    }

    fn next_value<I: Iterator<Item = String>>(iter: &mut I, flag: &str) -> Result<String, EmulatorError> {
        iter.next().ok_or_else(|| EmulatorError::MissingArgumentValue(flag.to_string()))
    }

    fn parse_log_spec(spec: &str, config: &mut Configuration) -> Result<(), EmulatorError> {
        match spec.split_once('=') {
            Some((module, level)) => {
                if !LOG_MODULES.contains(&module) {
                    return Err(EmulatorError::UnknownLogModule(module.to_string()));
                }
                config.log_levels.push((module.to_string(), LogLevel::parse(level)?));
            }
            None => {
                config.default_log_level = Some(LogLevel::parse(spec)?);
            }
        }
        Ok(())
    }

    pub fn usage() -> String {
        usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_memory_size_flag() {
        let c = Configuration::from_args(args(&["-m", "4"])).unwrap();
        assert_eq!(c.mem_size, 4 * 1024 * 1024);
    }

    #[test]
    fn rejects_invalid_memory_size() {
        let err = Configuration::from_args(args(&["-m", "3"])).unwrap_err();
        assert!(matches!(err, EmulatorError::InvalidMemorySize(3)));
    }

    #[test]
    fn parses_per_module_log_level() {
        let c = Configuration::from_args(args(&["-l", "scsi=debug"])).unwrap();
        assert_eq!(c.log_levels, vec![("scsi".to_string(), LogLevel::Debug)]);
    }

    #[test]
    fn rejects_unknown_log_module() {
        let err = Configuration::from_args(args(&["-l", "bogus=debug"])).unwrap_err();
        assert!(matches!(err, EmulatorError::UnknownLogModule(_)));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = Configuration::from_args(args(&["--frobnicate"])).unwrap_err();
        assert!(matches!(err, EmulatorError::UnknownArgument(_)));
    }
}
