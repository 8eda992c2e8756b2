use config::Config;
use data_types::{Error, Errors};

/// Build the [`reqwest::Client`] shared by every backend of a process.
///
/// Connection pool discipline lives here: idle connections per host, TCP
/// keep-alive and the connect timeout all come from the configuration; the
/// per-request deadline is the caller's concern.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client, Errors> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(config.max_idle_conns_per_host)
        .tcp_keepalive(config.keep_alive_interval)
        .connect_timeout(config.timeouts.connect)
        .build()
        .map_err(|e| Errors::from(Error::fatal(format!("cannot build HTTP client: {e}"))))
}
