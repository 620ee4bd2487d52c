//! PostgreSQL transport: pool construction and SSL negotiation.
//!
//! Pools are validated with a test query before they are handed out, so a
//! pool that exists is a pool that worked at least once.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use native_tls::{Certificate, Identity, Protocol, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{NoTls, Socket};

use crate::error::{TuskError, TuskResult};
use crate::models::{ConnectionConfig, SslConfig, SslMode, TlsState, TlsVersion};

/// Smallest pool that still leaves a side channel for cancellation.
const MIN_POOL_SIZE: usize = 2;

/// An open, validated pool and the security it negotiated.
pub(super) struct Transport {
    pub pool: Pool,
    pub tls_state: TlsState,
}

/// One rung of the SSL negotiation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Tls,
    Plaintext,
}

/// Open a pool following the SSL negotiation ladder.
pub(super) async fn open(config: &ConnectionConfig) -> TuskResult<Transport> {
    let mode = config.effective_ssl_mode();
    let fallback = config.ssl_config.allow_plaintext_fallback;

    let (pool, tls_state) = negotiate(mode, fallback, move |attempt| async move {
        match attempt {
            Attempt::Tls => open_tls(config, mode).await,
            Attempt::Plaintext => validated_pool(config, SslMode::Disable, NoTls).await,
        }
    })
    .await?;

    if tls_state == TlsState::DowngradedFromPrefer {
        tracing::warn!(connection_id = %config.id, host = %config.host, "Connected without TLS after TLS failed");
    }
    Ok(Transport { pool, tls_state })
}

/// Walk the ladder for `mode`, calling `attempt` for each rung tried.
///
/// `Prefer` tries TLS first. When that fails and `allow_fallback` is set,
/// one plaintext attempt follows and the result reports the downgrade.
/// Without the fallback the TLS error is returned. The verifying modes
/// never try plaintext.
async fn negotiate<P, F, Fut>(
    mode: SslMode,
    allow_fallback: bool,
    mut attempt: F,
) -> TuskResult<(P, TlsState)>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = TuskResult<P>>,
{
    match mode {
        SslMode::Disable => Ok((attempt(Attempt::Plaintext).await?, TlsState::Plaintext)),
        SslMode::Prefer => match attempt(Attempt::Tls).await {
            Ok(pool) => Ok((pool, TlsState::Encrypted)),
            Err(e) if allow_fallback => {
                tracing::debug!(error = %e, "TLS attempt failed, retrying without TLS");
                Ok((attempt(Attempt::Plaintext).await?, TlsState::DowngradedFromPrefer))
            }
            Err(e) => Err(e),
        },
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
            Ok((attempt(Attempt::Tls).await?, TlsState::Encrypted))
        }
    }
}

async fn open_tls(config: &ConnectionConfig, mode: SslMode) -> TuskResult<Pool> {
    let connector = MakeTlsConnector::new(tls_connector(&config.ssl_config, mode)?);

    match &config.ssl_config.server_name {
        Some(server_name) => {
            let tls = ServerNameOverride { inner: connector, server_name: server_name.clone() };
            validated_pool(config, mode, tls).await
        }
        None => validated_pool(config, mode, connector).await,
    }
}

/// Build the TLS connector with validation matching `mode`.
fn tls_connector(ssl: &SslConfig, mode: SslMode) -> TuskResult<TlsConnector> {
    let mut builder = TlsConnector::builder();

    match mode {
        SslMode::VerifyFull => {}
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::Disable | SslMode::Prefer | SslMode::Require => {
            builder.danger_accept_invalid_certs(!ssl.reject_unauthorized);
            builder.danger_accept_invalid_hostnames(!ssl.reject_unauthorized);
        }
    }

    if let Some(ca) = &ssl.ca {
        let pem = read_pem(ca, "CA certificate")?;
        let cert = Certificate::from_pem(&pem).map_err(|e| {
            TuskError::ssl_with_source(format!("Invalid CA certificate '{}'", ca.display()), e)
        })?;
        builder.add_root_certificate(cert);
    }

    if let (Some(cert), Some(key)) = (&ssl.cert, &ssl.key) {
        let cert_pem = read_pem(cert, "client certificate")?;
        let key_pem = read_pem(key, "client key")?;
        let identity = Identity::from_pkcs8(&cert_pem, &key_pem).map_err(|e| {
            TuskError::ssl_with_source("Client certificate and key do not form a valid identity", e)
        })?;
        builder.identity(identity);
    }

    if let Some(version) = ssl.min_version {
        builder.min_protocol_version(Some(match version {
            TlsVersion::Tls10 => Protocol::Tlsv10,
            TlsVersion::Tls11 => Protocol::Tlsv11,
            TlsVersion::Tls12 => Protocol::Tlsv12,
        }));
    }

    builder
        .build()
        .map_err(|e| TuskError::ssl_with_source("Failed to create TLS connector", e))
}

fn read_pem(path: &Path, what: &str) -> TuskResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        TuskError::ssl_with_source(format!("Cannot read {what} '{}'", path.display()), e)
    })
}

fn pg_config(config: &ConnectionConfig, mode: SslMode) -> tokio_postgres::Config {
    let connect_timeout = Duration::from_secs(config.options.connect_timeout_secs as u64);

    let mut pg_config = tokio_postgres::Config::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.username);
    if let Some(password) = &config.password {
        pg_config.password(password);
    }
    pg_config.application_name(&config.options.application_name);
    pg_config.connect_timeout(connect_timeout);
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(60));
    pg_config.ssl_mode(if mode.uses_tls() {
        tokio_postgres::config::SslMode::Require
    } else {
        tokio_postgres::config::SslMode::Disable
    });
    if let Some(secs) = config.options.statement_timeout_secs {
        pg_config.options(&format!("-c statement_timeout={}s", secs));
    }
    pg_config
}

/// Build a pool and prove it works with `SELECT 1`.
async fn validated_pool<T>(config: &ConnectionConfig, mode: SslMode, tls: T) -> TuskResult<Pool>
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let connect_timeout = Duration::from_secs(config.options.connect_timeout_secs as u64);
    let wait_timeout = Duration::from_secs(config.options.pool_wait_timeout_secs as u64);

    let manager = Manager::from_config(
        pg_config(config, mode),
        tls,
        ManagerConfig { recycling_method: RecyclingMethod::Fast },
    );

    let pool = Pool::builder(manager)
        .max_size(config.options.pool_max_size.max(MIN_POOL_SIZE))
        .wait_timeout(Some(wait_timeout))
        .create_timeout(Some(connect_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| TuskError::connection(format!("Failed to create pool: {e}")))?;

    let client = pool
        .get()
        .await
        .map_err(|e| TuskError::connection(format!("Failed to establish connection: {e}")))?;

    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| TuskError::connection(format!("Connection validation failed: {e}")))?;

    tracing::info!(
        connection_id = %config.id,
        host = %config.host,
        database = %config.database,
        ssl_mode = mode.as_str(),
        "Connection pool created"
    );

    Ok(pool)
}

/// Verifies the server certificate against a fixed name instead of the host.
#[derive(Clone)]
struct ServerNameOverride {
    inner: MakeTlsConnector,
    server_name: String,
}

impl MakeTlsConnect<Socket> for ServerNameOverride {
    type Stream = <MakeTlsConnector as MakeTlsConnect<Socket>>::Stream;
    type TlsConnect = <MakeTlsConnector as MakeTlsConnect<Socket>>::TlsConnect;
    type Error = <MakeTlsConnector as MakeTlsConnect<Socket>>::Error;

    fn make_tls_connect(&mut self, _domain: &str) -> Result<Self::TlsConnect, Self::Error> {
        <MakeTlsConnector as MakeTlsConnect<Socket>>::make_tls_connect(&mut self.inner, &self.server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the ladder with TLS either working or failing; report the
    /// outcome and the rungs tried.
    async fn ladder(mode: SslMode, allow_fallback: bool, tls_works: bool) -> (TuskResult<TlsState>, Vec<Attempt>) {
        let mut tried = Vec::new();
        let outcome = negotiate(mode, allow_fallback, |attempt| {
            tried.push(attempt);
            let ok = attempt == Attempt::Plaintext || tls_works;
            async move {
                if ok {
                    Ok(())
                } else {
                    Err(TuskError::ssl("server does not support SSL"))
                }
            }
        })
        .await;
        (outcome.map(|(_, state)| state), tried)
    }

    #[tokio::test]
    async fn test_prefer_uses_tls_when_it_works() {
        let (state, tried) = ladder(SslMode::Prefer, true, true).await;
        assert_eq!(state.unwrap(), TlsState::Encrypted);
        assert_eq!(tried, [Attempt::Tls]);
    }

    #[tokio::test]
    async fn test_prefer_downgrade_is_reported() {
        let (state, tried) = ladder(SslMode::Prefer, true, false).await;
        assert_eq!(state.unwrap(), TlsState::DowngradedFromPrefer);
        assert_eq!(tried, [Attempt::Tls, Attempt::Plaintext]);
    }

    #[tokio::test]
    async fn test_prefer_without_fallback_returns_tls_error() {
        let (state, tried) = ladder(SslMode::Prefer, false, false).await;
        assert!(matches!(state, Err(TuskError::Ssl { .. })));
        assert_eq!(tried, [Attempt::Tls]);
    }

    #[tokio::test]
    async fn test_verifying_modes_never_fall_back() {
        for mode in [SslMode::Require, SslMode::VerifyCa, SslMode::VerifyFull] {
            let (state, tried) = ladder(mode, true, false).await;
            assert!(state.is_err(), "{mode:?}");
            assert_eq!(tried, [Attempt::Tls]);
        }
    }

    #[tokio::test]
    async fn test_disable_is_plaintext_only() {
        let (state, tried) = ladder(SslMode::Disable, true, true).await;
        assert_eq!(state.unwrap(), TlsState::Plaintext);
        assert_eq!(tried, [Attempt::Plaintext]);
    }

    #[test]
    fn test_connector_builds_for_every_mode() {
        let ssl = SslConfig::default();
        for mode in [SslMode::Prefer, SslMode::Require, SslMode::VerifyCa, SslMode::VerifyFull] {
            assert!(tls_connector(&ssl, mode).is_ok(), "{mode:?}");
        }
    }

    #[test]
    fn test_missing_ca_file_is_ssl_error() {
        let ssl = SslConfig {
            ca: Some("/definitely/not/here.pem".into()),
            ..SslConfig::with_mode(SslMode::VerifyFull)
        };
        assert!(matches!(tls_connector(&ssl, SslMode::VerifyFull), Err(TuskError::Ssl { .. })));
    }

    #[test]
    fn test_pg_config_maps_ssl_and_timeouts() {
        let mut config = ConnectionConfig::postgres("pg", "db.internal", "app", "alice");
        config.options.statement_timeout_secs = Some(30);

        let pg = pg_config(&config, SslMode::Require);
        assert_eq!(pg.get_ssl_mode(), tokio_postgres::config::SslMode::Require);
        assert_eq!(pg.get_options(), Some("-c statement_timeout=30s"));
        assert_eq!(pg.get_user(), Some("alice"));

        let pg = pg_config(&config, SslMode::Disable);
        assert_eq!(pg.get_ssl_mode(), tokio_postgres::config::SslMode::Disable);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let mut config = ConnectionConfig::postgres("pg", "127.0.0.1", "app", "alice");
        config.port = 1;
        config.options.connect_timeout_secs = 2;
        match open(&config).await {
            Err(e) => assert!(e.is_connection_lost()),
            Ok(_) => panic!("nothing should listen on port 1"),
        }
    }
}
