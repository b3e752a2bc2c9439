use crate::error::ConnectorError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_postgres::{
    Client, Config, Connection, NoTls,
    config::SslMode,
    tls::{MakeTlsConnect, TlsConnect},
};
use tracing::{error, warn};

/// Opens a client honouring the `sslmode` of the url. `prefer` falls back
/// to a plain socket when the handshake fails.
pub(crate) async fn connect_client(url: &str) -> Result<Client, ConnectorError> {
    let config = url
        .parse::<Config>()
        .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;

    match config.get_ssl_mode() {
        SslMode::Disable => open(&config, NoTls).await,
        SslMode::Prefer => match open(&config, tls()?).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "TLS handshake failed, reconnecting without TLS");
                open(&config, NoTls).await
            }
        },
        _ => open(&config, tls()?).await,
    }
}

fn tls() -> Result<MakeTlsConnector, ConnectorError> {
    Ok(MakeTlsConnector::new(TlsConnector::builder().build()?))
}

async fn open<T>(config: &Config, tls: T) -> Result<Client, ConnectorError>
where
    T: MakeTlsConnect<tokio_postgres::Socket>,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<tokio_postgres::Socket>>::Future: Send,
{
    let (client, connection) = config.connect(tls).await?;
    drive(connection);
    Ok(client)
}

fn drive<S, T>(connection: Connection<S, T>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            error!(%error, "postgres connection closed with error");
        }
    });
}
