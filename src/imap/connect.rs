// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connection bootstrap: TCP dial, TLS handshake, framed split, and the
//! delivery task feeding the session engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::SessionConfig;
use crate::imap::client::ImapClient;
use crate::imap::codec::ImapCodec;
use crate::imap::command::Command;
use crate::imap::error::SessionError;
use crate::transport::{ImapTransport, TransportError, TransportNotice};

type TlsWriteFrames = FramedWrite<WriteHalf<TlsStream<TcpStream>>, ImapCodec>;
type TlsReadFrames = FramedRead<ReadHalf<TlsStream<TcpStream>>, ImapCodec>;

/// TLS-backed transport for one session: framed writes on this side, a
/// delivery task feeding the notice channel on the other.
pub struct TlsTransport {
    writer: Mutex<Option<TlsWriteFrames>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl ImapTransport for TlsTransport {
    async fn write(&self, command: &Command) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };
        writer.send(command.clone()).await
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("closing connection");
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.close().await {
                warn!("error while closing connection: {}", err);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Establishes TCP connection, performs TLS handshake, and returns the
/// encrypted stream.
async fn setup_tls_stream(config: &SessionConfig) -> Result<TlsStream<TcpStream>, SessionError> {
    let server_name: ServerName<'static> = ServerName::try_from(config.host.clone())
        .map_err(|_| SessionError::Tls(format!("Invalid server name format: {}", config.host)))?;

    let mut root_cert_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()?;
    let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
    debug!("Loaded {} native certs, ignored {}.", added, ignored);
    if root_cert_store.is_empty() {
        warn!("Root certificate store is empty after loading native certs.");
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    debug!(
        "Attempting TCP connection to {}:{}...",
        config.host, config.port
    );
    let tcp = timeout(
        config.connect_timeout(),
        TcpStream::connect((config.host.as_str(), config.port)),
    )
    .await
    .map_err(|_| SessionError::Timeout(format!("connect to {}:{}", config.host, config.port)))??;
    debug!("TCP connected. Performing TLS handshake...");

    let tls = connector.connect(server_name, tcp).await?;
    debug!("TLS handshake successful.");
    Ok(tls)
}

/// Dials the server, spawns the delivery task, and returns a ready session
/// handle. The caller drives `login()` next; the server greeting arrives
/// as an informational event.
pub async fn connect(config: &SessionConfig) -> Result<ImapClient<TlsTransport>, SessionError> {
    info!(
        "Connecting to {}:{} for user '{}'",
        config.host, config.port, config.username
    );
    let tls = setup_tls_stream(config).await?;
    let (read_half, write_half) = tokio::io::split(tls);

    let open = Arc::new(AtomicBool::new(true));
    let (notice_tx, notice_rx) = mpsc::channel(32);
    let frames = FramedRead::new(read_half, ImapCodec::new());
    tokio::spawn(deliver(
        frames,
        notice_tx,
        config.idle_interval(),
        Arc::clone(&open),
    ));

    let transport = Arc::new(TlsTransport {
        writer: Mutex::new(Some(FramedWrite::new(write_half, ImapCodec::new()))),
        open,
    });
    Ok(ImapClient::spawn(transport, notice_rx, config.clone()))
}

/// Delivery loop: decoded responses and idle notifications, in arrival
/// order, until EOF or a decode failure ends the connection.
async fn deliver(
    mut frames: TlsReadFrames,
    notices: mpsc::Sender<TransportNotice>,
    idle_interval: Duration,
    open: Arc<AtomicBool>,
) {
    loop {
        match timeout(idle_interval, frames.next()).await {
            Err(_) => {
                if notices.send(TransportNotice::Idle).await.is_err() {
                    break;
                }
            }
            Ok(Some(Ok(response))) => {
                if notices.send(TransportNotice::Message(response)).await.is_err() {
                    break;
                }
            }
            Ok(Some(Err(err))) => {
                error!("inbound decode failed: {}", err);
                break;
            }
            Ok(None) => {
                debug!("connection reached EOF");
                break;
            }
        }
    }
    open.store(false, Ordering::SeqCst);
    let _ = notices.send(TransportNotice::Closed).await;
}
