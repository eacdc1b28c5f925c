//! Output plugin configuration. Durations are configured as human strings
//! (`"30s"`) in the host agent's configuration file and deserialized with
//! `humantime_serde`, rather than as raw nanosecond integers.

use std::time::Duration;

use mysql_async::{Opts, OptsBuilder, SslOpts};
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    4000
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(with = "humantime_serde", default = "default_backoff_init")]
    pub init: Duration,
    #[serde(with = "humantime_serde", default = "default_backoff_max")]
    pub max: Duration,
}

fn default_backoff_init() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(10)
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            init: default_backoff_init(),
            max: default_backoff_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    #[serde(default = "default_retention")]
    pub retention: u32,
    #[serde(default = "default_roll_step")]
    pub roll_step: u32,
}

fn default_retention() -> u32 {
    365
}

fn default_roll_step() -> u32 {
    3
}

impl Default for Partition {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            roll_step: default_roll_step(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default)]
    pub ca_path: Option<String>,
    #[serde(default)]
    pub client_cert_path: Option<String>,
    #[serde(default)]
    pub client_key_path: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,

    #[serde(default)]
    pub partition: Partition,
}

impl Config {
    /// All three TLS paths must be present, or none of them are used.
    pub fn is_mutual_tls_enabled(&self) -> bool {
        self.ca_path.is_some() && self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    /// Builds the `mysql_async` connection options for this configuration,
    /// including mutual TLS when configured. `mysql_async` attaches TLS
    /// options per connection pool, so there is no separate driver-wide
    /// "register this TLS profile" step to perform first.
    ///
    /// `client_key_path` is accepted and required by [`Self::is_mutual_tls_enabled`]
    /// (matching the original config's all-three-or-none rule) but is not
    /// separately loaded here: `mysql_async::SslOpts` takes one PKCS#12
    /// bundle path for the client identity rather than split PEM cert/key
    /// files, so `client_cert_path` is expected to point at that bundle.
    pub fn to_opts(&self) -> crate::error::Result<Opts> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .db_name(Some(self.database.clone()));

        if self.is_mutual_tls_enabled() {
            let ssl_opts = SslOpts::default()
                .with_root_cert_path(self.ca_path.clone().map(Into::into))
                .with_pkcs12_path(self.client_cert_path.clone().map(Into::into));
            builder = builder.ssl_opts(Some(ssl_opts));
        } else if self.ca_path.is_some() || self.client_cert_path.is_some() || self.client_key_path.is_some() {
            return Err(crate::error::WriterError::Config {
                message: "some of tls configs (ca, client key, or client cert) are missing".to_string(),
            });
        }

        Ok(Opts::from(builder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let cfg: Config = serde_json::from_str(
            r#"{"host": "tidb.local", "user": "root", "database": "logs"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff.init, Duration::from_secs(1));
        assert_eq!(cfg.backoff.max, Duration::from_secs(10));
        assert_eq!(cfg.partition.retention, 365);
        assert_eq!(cfg.partition.roll_step, 3);
    }

    #[test]
    fn mutual_tls_requires_all_three_paths() {
        let mut cfg: Config = serde_json::from_str(
            r#"{"host": "h", "user": "u", "database": "d", "ca_path": "ca.pem"}"#,
        )
        .unwrap();
        assert!(!cfg.is_mutual_tls_enabled());
        cfg.client_cert_path = Some("cert.pem".to_string());
        cfg.client_key_path = Some("key.pem".to_string());
        assert!(cfg.is_mutual_tls_enabled());
    }
}
