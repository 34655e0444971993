use std::fmt::Debug;
use std::path::{Path, PathBuf};

use chrono::Local;

pub fn warn_default<D: Debug>(sec: &str, key: &str, problem: &str, default: D) {
    eprintln!(
        "[{}] WARN: config {}:{} {}; proceeding with default {:?}",
        Local::now(),
        sec,
        key,
        problem,
        default
    );
}

/// Optional config value with a default; anything missing or of the wrong type is reported on
/// stderr and replaced by the default.
macro_rules! tomlget_or {
    ($cfg:expr, $sec:expr, $key:expr, as_str, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            None => {
                $crate::util::warn_default($sec, $key, "not found", $or);
                $or
            }
            Some(val) => val.as_str().unwrap_or_else(|| {
                $crate::util::warn_default($sec, $key, "is not a string", $or);
                $or
            }),
        }
    };
    ($cfg:expr, $sec:expr, $key:expr, as_bool, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            None => {
                $crate::util::warn_default($sec, $key, "not found", $or);
                $or
            }
            Some(val) => val.as_bool().unwrap_or_else(|| {
                $crate::util::warn_default($sec, $key, "is not a boolean", $or);
                $or
            }),
        }
    };
    ($cfg:expr, $sec:expr, $key:expr, $conv:ident, $as:ty, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            None => {
                $crate::util::warn_default($sec, $key, "not found", $or);
                $or
            }
            Some(val) => match val.$conv() {
                Some(x) => x as $as,
                None => {
                    $crate::util::warn_default(
                        $sec,
                        $key,
                        concat!("does not convert to ", stringify!($as)),
                        $or,
                    );
                    $or
                }
            },
        }
    };
}

macro_rules! tomlget_opt {
    ($cfg:expr, $sec:expr, $key:expr, as_str) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .and_then(|val| val.as_str())
    };
    ($cfg:expr, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .and_then(|val| val.$conv())
            .map(|val| val as $as)
    };
}

/// Required config value; early-returns `Err(String)` from the enclosing function.
macro_rules! tomlget {
    ($cfg:expr, $sec:expr, $key:expr, as_str) => {
        $cfg.get($sec)
            .ok_or_else(|| format!("failed to get section {}", $sec))?
            .get($key)
            .ok_or_else(|| format!("failed to get key {}:{}", $sec, $key))?
            .as_str()
            .ok_or_else(|| format!("failed to convert {}:{} to string", $sec, $key))?
    };
    ($cfg:expr, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        $cfg.get($sec)
            .ok_or_else(|| format!("failed to get section {}", $sec))?
            .get($key)
            .ok_or_else(|| format!("failed to get key {}:{}", $sec, $key))?
            .$conv()
            .ok_or_else(|| format!("failed to convert {}:{} to {}", $sec, $key, stringify!($as)))?
            as $as
    };
}

/// Look for `file_name` as given if absolute, else in the working directory and then next to the
/// executable.
#[must_use]
pub fn find_file(file_name: &Path) -> Option<PathBuf> {
    if file_name.is_absolute() {
        return file_name.exists().then(|| file_name.into());
    }
    let candidates = [
        std::env::current_dir().ok(),
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf)),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(|dir| dir.join(file_name))
        .find(|p| p.exists())
}

pub(crate) use {tomlget, tomlget_opt, tomlget_or};

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> toml::Value {
        r#"
            [scope]
            scale_v = 0.2
            channel = 2
            coupling = "AC"
            bogus = "x"
            [general]
            simulate = true
        "#
        .parse()
        .unwrap()
    }

    fn required(cfg: &toml::Value) -> Result<(f64, &str), String> {
        Ok((
            tomlget!(cfg, "scope", "scale_v", as_float, f64),
            tomlget!(cfg, "scope", "coupling", as_str),
        ))
    }

    fn missing(cfg: &toml::Value) -> Result<f64, String> {
        Ok(tomlget!(cfg, "trigger", "level_v", as_float, f64))
    }

    #[test]
    fn defaults_fill_gaps() {
        let cfg = cfg();
        assert_eq!(tomlget_or!(cfg, "scope", "scale_v", as_float, f64, 1.0), 0.2);
        assert_eq!(tomlget_or!(cfg, "scope", "channel", as_integer, u8, 1), 2);
        assert_eq!(tomlget_or!(cfg, "scope", "offset_v", as_float, f64, -0.5), -0.5);
        assert_eq!(tomlget_or!(cfg, "scope", "bogus", as_float, f64, 3.0), 3.0);
        assert_eq!(tomlget_or!(cfg, "scope", "coupling", as_str, "DC"), "AC");
        assert!(tomlget_or!(cfg, "general", "simulate", as_bool, false));
    }

    #[test]
    fn optional_and_required() {
        let cfg = cfg();
        assert_eq!(tomlget_opt!(cfg, "scope", "channel", as_integer, u8), Some(2));
        assert_eq!(tomlget_opt!(cfg, "scope", "missing", as_str), None);
        assert_eq!(required(&cfg), Ok((0.2, "AC")));
        assert_eq!(
            missing(&cfg),
            Err("failed to get section trigger".to_owned())
        );
    }

    #[test]
    fn find_file_misses_nonexistent() {
        assert_eq!(find_file(Path::new("/definitely/not/here.toml")), None);
        assert_eq!(find_file(Path::new("no-such-config-file.toml")), None);
    }
}
