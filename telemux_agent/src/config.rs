//! Agent configuration: defaults, then `TELEMUX_*` environment, then CLI flags.

use std::time::Duration;

use crate::error::ConfigError;
use crate::logs::LogConfig;
use crate::sampler::SamplerConfig;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_FOLLOW_CMD: &str = "journalctl -f -n 0 -o short-iso -u {instance}";
pub const DEFAULT_DUMP_CMD: &str = "journalctl -n 200 --no-pager -o short-iso -u {instance}";

pub const USAGE: &str = "\
Usage: telemux_agent [OPTIONS]

Options:
  -p, --port <PORT>        Listen port (default 3000, env TELEMUX_PORT)
      --sample-ms <MS>     Metrics sampling interval (default 1000, env TELEMUX_SAMPLE_MS)
      --follow-cmd <CMD>   Log follow command, {instance} is substituted (env TELEMUX_FOLLOW_CMD)
      --dump-cmd <CMD>     One-shot log dump command (env TELEMUX_DUMP_CMD)
      --token <TOKEN>      Require ?token=<TOKEN> on websocket upgrade (env TELEMUX_TOKEN)
  -h, --help               Print this help
";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub sample_interval: Duration,
    pub follow_cmd: String,
    pub dump_cmd: String,
    pub auth_token: Option<String>,
    /// Outbound frames queued per connection before events are dropped for it.
    pub client_queue: usize,
    pub sampler: SamplerConfig,
    pub logs: LogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            sample_interval: Duration::from_millis(1000),
            follow_cmd: DEFAULT_FOLLOW_CMD.to_string(),
            dump_cmd: DEFAULT_DUMP_CMD.to_string(),
            auth_token: None,
            client_queue: 256,
            sampler: SamplerConfig::default(),
            logs: LogConfig::default(),
        }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    match parse_num::<u64>(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

impl AgentConfig {
    /// Defaults overridden by the process environment and `std::env::args()`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.apply_args(std::env::args())?;
        Ok(cfg)
    }

    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TELEMUX_PORT") {
            self.port = parse_num("TELEMUX_PORT", &v)?;
        }
        if let Some(v) = get("TELEMUX_SAMPLE_MS") {
            self.sample_interval = Duration::from_millis(positive("TELEMUX_SAMPLE_MS", &v)?);
        }
        if let Some(v) = get("TELEMUX_REAP_SECS") {
            self.logs.reap_interval = Duration::from_secs(positive("TELEMUX_REAP_SECS", &v)?);
        }
        if let Some(v) = get("TELEMUX_IDLE_SECS") {
            self.logs.idle_threshold = Duration::from_secs(parse_num("TELEMUX_IDLE_SECS", &v)?);
        }
        if let Some(v) = get("TELEMUX_LOG_BUFFER") {
            self.logs.buffer_capacity = positive("TELEMUX_LOG_BUFFER", &v)? as usize;
        }
        if let Some(v) = get("TELEMUX_DUMP_TIMEOUT_MS") {
            self.logs.dump_timeout =
                Duration::from_millis(positive("TELEMUX_DUMP_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("TELEMUX_FOLLOW_CMD") {
            self.follow_cmd = v;
        }
        if let Some(v) = get("TELEMUX_DUMP_CMD") {
            self.dump_cmd = v;
        }
        if let Some(v) = get("TELEMUX_TOKEN") {
            self.auth_token = Some(v);
        }
        Ok(())
    }

    /// First item is the program name.
    pub fn apply_args<I: IntoIterator<Item = String>>(&mut self, args: I) -> Result<(), ConfigError> {
        let mut it = args.into_iter();
        let _ = it.next();
        while let Some(a) = it.next() {
            let (flag, inline) = match a.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (a.clone(), None),
            };
            if matches!(flag.as_str(), "-h" | "--help") {
                return Err(ConfigError::Help(USAGE.to_string()));
            }
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| it.next())
                    .ok_or_else(|| ConfigError::MissingValue(flag.clone()))
            };
            match flag.as_str() {
                "-p" | "--port" => self.port = parse_num(&flag, &value()?)?,
                "--sample-ms" => {
                    self.sample_interval = Duration::from_millis(positive(&flag, &value()?)?)
                }
                "--follow-cmd" => self.follow_cmd = value()?,
                "--dump-cmd" => self.dump_cmd = value()?,
                "--token" => self.auth_token = Some(value()?),
                _ => return Err(ConfigError::UnexpectedArgument(a)),
            }
        }
        Ok(())
    }
}
