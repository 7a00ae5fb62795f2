use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// Server settings, read from `CADENCE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "cadence".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    Invalid { var: &'static str, value: String },
    /// Only one of the TLS cert/key pair was given.
    PartialTls,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::PartialTls => {
                write!(f, "both CADENCE_TLS_CERT and CADENCE_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Unset variables keep
    /// their defaults; set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(bind) = lookup("CADENCE_BIND") {
            config.bind = bind;
        }
        if let Some(port) = parsed(&lookup, "CADENCE_PORT")? {
            config.port = port;
        }
        if let Some(dir) = lookup("CADENCE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(password) = lookup("CADENCE_PASSWORD") {
            config.password = password;
        }
        if let Some(max) = parsed(&lookup, "CADENCE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(threshold) = parsed(&lookup, "CADENCE_COMPACT_THRESHOLD")? {
            config.compact_threshold = threshold;
        }
        config.metrics_port = parsed(&lookup, "CADENCE_METRICS_PORT")?;

        config.tls_cert = lookup("CADENCE_TLS_CERT");
        config.tls_key = lookup("CADENCE_TLS_KEY");
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                ConfigError::PartialTls.to_string(),
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key in key file"))?;

    let mut tls = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    tls.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(tls))))
}
