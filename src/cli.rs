use crate::config::RuntimeConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    config_path: Option<PathBuf>,
    scripts_root: Option<PathBuf>,
    update_rate: Option<f64>,
    max_frames: Option<u64>,
    watch: Option<bool>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config_path = Some(PathBuf::from(value)),
                "scripts" => overrides.scripts_root = Some(PathBuf::from(value)),
                "update-rate" => {
                    let rate = value.parse::<f64>().with_context(|| format!("Invalid update rate '{value}'"))?;
                    if !(rate.is_finite() && rate > 0.0) {
                        bail!("Invalid update rate '{value}'. Use a positive number of updates per second.");
                    }
                    overrides.update_rate = Some(rate);
                }
                "frames" => {
                    overrides.max_frames =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "watch" => overrides.watch = Some(parse_bool_flag("watch", &value)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --scripts, --update-rate, --frames, --watch."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    pub fn into_config_overrides(self) -> RuntimeConfigOverrides {
        RuntimeConfigOverrides {
            scripts_root: self.scripts_root,
            update_rate: self.update_rate,
            max_frames: self.max_frames,
            watch: self.watch,
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_flag() {
        let args = [
            "cartridge", "--config", "cfg.json", "--scripts", "demo", "--update-rate", "30", "--frames", "90",
            "--watch", "off",
        ];
        let cli = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(cli.config_path(), Some(&PathBuf::from("cfg.json")));
        let overrides = cli.into_config_overrides();
        assert_eq!(overrides.scripts_root, Some(PathBuf::from("demo")));
        assert_eq!(overrides.update_rate, Some(30.0));
        assert_eq!(overrides.max_frames, Some(90));
        assert_eq!(overrides.watch, Some(false));
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["cartridge", "--frames", "10", "--frames", "20", "--watch", "on", "--watch", "no"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!((overrides.max_frames, overrides.watch), (Some(20), Some(false)));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["cartridge", "--frames"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_rates() {
        let err = CliOverrides::parse(["cartridge", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        assert!(CliOverrides::parse(["cartridge", "--update-rate", "-5"]).is_err());
        assert!(CliOverrides::parse(["cartridge", "--update-rate", "fast"]).is_err());
    }

    #[test]
    fn no_flags_means_no_overrides() {
        let cli = CliOverrides::parse(["cartridge"]).expect("parse");
        assert!(cli.config_path().is_none());
        assert!(cli.into_config_overrides().is_empty());
    }
}
