use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use tracing::{info, warn};

use crate::limits::MAX_CONNECTIONS;

/// Server settings, read from `STAYDB_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_connections: usize = parse_or(&lookup, "STAYDB_MAX_CONNECTIONS", 256)?;
        if max_connections == 0 || max_connections > MAX_CONNECTIONS {
            return Err(ConfigError {
                key: "STAYDB_MAX_CONNECTIONS",
                message: format!("must be between 1 and {MAX_CONNECTIONS}"),
            });
        }
        let tls_cert = lookup("STAYDB_TLS_CERT").map(PathBuf::from);
        let tls_key = lookup("STAYDB_TLS_KEY").map(PathBuf::from);
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError {
                key: "STAYDB_TLS_CERT",
                message: "STAYDB_TLS_CERT and STAYDB_TLS_KEY must be set together".into(),
            });
        }

        Ok(Self {
            port: parse_or(&lookup, "STAYDB_PORT", 5433)?,
            bind: lookup("STAYDB_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("STAYDB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: lookup("STAYDB_PASSWORD").unwrap_or_else(|| {
                warn!("STAYDB_PASSWORD not set, using the default password");
                "staydb".into()
            }),
            max_connections,
            compact_threshold: parse_or(&lookup, "STAYDB_COMPACT_THRESHOLD", 1000)?,
            metrics_port: lookup("STAYDB_METRICS_PORT")
                .map(|v| parse_value("STAYDB_METRICS_PORT", &v))
                .transpose()?,
            tls_cert,
            tls_key,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// TLS acceptor for the configured certificate, if any.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(v) => parse_value(key, &v),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|e| ConfigError {
        key,
        message: format!("{value:?}: {e}"),
    })
}
