use std::{fs::File, io::BufReader, sync::Arc};

use postern_common::outgoing;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ProtocolVersion, ServerConfig, ServerConnection, SupportedCipherSuite,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
    server::TlsStream,
};

use crate::{
    error::{ConnectionError, ConnectionResult, TlsError, TlsResult},
    reply::{MAX_REPLY_LINE, Reply},
    session::TlsContext,
};

/// Size of the internal read buffer.
const BUFFER_SIZE: usize = 8192;

/// Negotiated parameters of an upgraded connection.
#[derive(Debug)]
pub struct TlsInfo {
    version: ProtocolVersion,
    ciphers: SupportedCipherSuite,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> TlsResult<Self> {
        Ok(Self {
            version: conn
                .protocol_version()
                .ok_or_else(|| TlsError::UpgradeFailed("missing protocol version".to_string()))?,
            ciphers: conn
                .negotiated_cipher_suite()
                .ok_or_else(|| TlsError::UpgradeFailed("missing cipher suite".to_string()))?,
        })
    }

    pub fn proto(&self) -> String {
        self.version.as_str().unwrap_or_default().to_string()
    }

    pub fn cipher(&self) -> String {
        self.ciphers.suite().as_str().unwrap_or_default().to_string()
    }
}

enum Transport<Stream> {
    Plain(Stream),
    Tls(Box<TlsStream<Stream>>),
    /// Left behind when an upgrade fails part way through.
    Closed,
}

/// A single line read from the client.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// The line, without its line terminator.
    Complete(Vec<u8>),
    /// The line exceeded the allowed length; it has been consumed and dropped.
    TooLong,
}

/// Buffered, line aware access to the client, plain or TLS.
pub struct Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    transport: Transport<Stream>,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            transport: Transport::Plain(stream),
            read_buf: vec![0; BUFFER_SIZE],
            read_pos: 0,
            read_len: 0,
        }
    }

    /// Refill the read buffer, which must be fully consumed.
    async fn fill(&mut self) -> ConnectionResult<()> {
        let read = match &mut self.transport {
            Transport::Plain(stream) => stream.read(&mut self.read_buf).await?,
            Transport::Tls(stream) => stream.read(&mut self.read_buf).await?,
            Transport::Closed => 0,
        };

        if read == 0 {
            return Err(ConnectionError::Closed);
        }

        self.read_pos = 0;
        self.read_len = read;

        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.write_all(bytes).await?,
            Transport::Tls(stream) => stream.write_all(bytes).await?,
            Transport::Closed => return Err(ConnectionError::Closed),
        }

        Ok(())
    }

    async fn flush(&mut self) -> ConnectionResult<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
            Transport::Closed => return Err(ConnectionError::Closed),
        }

        Ok(())
    }

    /// Read one LF terminated line of at most `max_len` bytes (terminator
    /// included). A trailing CR is stripped along with the LF.
    ///
    /// Longer lines are read up to and including their terminator and
    /// reported as [`Line::TooLong`], so the stream stays in sync.
    #[tracing::instrument(level = tracing::Level::TRACE, skip(self))]
    pub async fn read_line(&mut self, max_len: usize) -> ConnectionResult<Line> {
        let mut line = Vec::new();
        let mut too_long = false;

        loop {
            if self.read_pos == self.read_len {
                self.fill().await?;
            }

            let available = &self.read_buf[self.read_pos..self.read_len];
            let (chunk, complete) = available
                .iter()
                .position(|&b| b == b'\n')
                .map_or((available, false), |idx| (&available[..=idx], true));

            if !too_long && line.len() + chunk.len() > max_len {
                too_long = true;
                line = Vec::new();
            }

            if !too_long {
                line.extend_from_slice(chunk);
            }

            self.read_pos += chunk.len();

            if complete {
                break;
            }
        }

        if too_long {
            return Ok(Line::TooLong);
        }

        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(Line::Complete(line))
    }

    /// Move exactly `count` raw bytes from the client into `sink`.
    ///
    /// All `count` bytes are consumed from the wire even if writing to the
    /// sink fails; the sink error is handed back in the inner result.
    #[tracing::instrument(level = tracing::Level::TRACE, skip(self, sink))]
    pub async fn read_exact_into<W>(
        &mut self,
        count: usize,
        sink: &mut W,
    ) -> ConnectionResult<std::io::Result<()>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut remaining = count;
        let mut outcome = Ok(());

        while remaining > 0 {
            if self.read_pos == self.read_len {
                self.fill().await?;
            }

            let take = remaining.min(self.read_len - self.read_pos);

            if outcome.is_ok() {
                outcome = sink
                    .write_all(&self.read_buf[self.read_pos..self.read_pos + take])
                    .await;
            }

            self.read_pos += take;
            remaining -= take;
        }

        Ok(outcome)
    }

    /// Send a reply, one wire line at a time, and flush it.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub async fn send(&mut self, reply: &Reply) -> ConnectionResult<()> {
        for line in reply.wire_lines() {
            outgoing!("{line}");

            let mut buffer = arrayvec::ArrayString::<MAX_REPLY_LINE>::new();
            buffer.push_str(&line);
            buffer.push_str("\r\n");

            self.write_all(buffer.as_bytes()).await?;
        }

        self.flush().await
    }

    fn load_certs<P: AsRef<std::path::Path>>(
        path: &P,
    ) -> std::io::Result<Vec<CertificateDer<'static>>> {
        rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect()
    }

    fn load_keys<P: AsRef<std::path::Path>>(path: &P) -> TlsResult<PrivateKeyDer<'static>> {
        let path_str = path.as_ref().display().to_string();
        let mut reader = BufReader::new(File::open(path).map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })?);

        match rustls_pemfile::read_one(&mut reader).map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
            _ => Err(TlsError::KeyLoad {
                path: path_str,
                reason: "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                    .to_string(),
            }),
        }
    }

    /// Perform the server side of a TLS handshake over the plain transport.
    ///
    /// Anything the client pipelined behind STARTTLS is discarded
    /// (RFC 3207 4.2). On failure the connection is left closed.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub async fn upgrade(&mut self, tls_context: &TlsContext) -> TlsResult<TlsInfo> {
        tracing::debug!("Upgrading connection ...");

        let stream = match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(stream) => stream,
            Transport::Tls(stream) => {
                self.transport = Transport::Tls(stream);
                return Err(TlsError::UpgradeFailed(
                    "connection is already secure".to_string(),
                ));
            }
            Transport::Closed => {
                return Err(TlsError::UpgradeFailed("connection is closed".to_string()));
            }
        };

        let certs =
            Self::load_certs(&tls_context.certificate).map_err(|e| TlsError::CertificateLoad {
                path: tls_context.certificate.display().to_string(),
                source: e,
            })?;
        let keys = Self::load_keys(&tls_context.key)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, keys)?;

        let acceptor = TlsAcceptor::from(Arc::new(config));
        let stream = acceptor.accept(stream).await?;
        let info = TlsInfo::of(stream.get_ref().1)?;

        self.transport = Transport::Tls(Box::new(stream));
        self.read_pos = 0;
        self.read_len = 0;

        Ok(info)
    }
}
