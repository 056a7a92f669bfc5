//! In-process fake IMAP server
//!
//! Every command line is parsed with `imap-codec`'s `CommandCodec` and
//! dispatched on the `CommandBody` variant. The mailbox is shared with
//! the test through `Arc<Mutex<_>>`, so a test can deliver mail or
//! reset a folder's UIDVALIDITY between sync cycles.

use super::mailbox::Mailbox;
use super::responses::{self, write_line};
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// How a client reaches the TLS layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain greeting, then STARTTLS (port 143 style).
    StartTls,
    /// TLS handshake first, greeting over TLS (port 993 style).
    Implicit,
}

/// A fake IMAP server on `127.0.0.1` with an OS-assigned port.
///
/// A self-signed certificate is generated at startup with `rcgen`.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    logins: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a server that requires STARTTLS before LOGIN.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, TlsMode::StartTls).await
    }

    /// Start a server that speaks TLS from the first byte.
    pub async fn start_implicit_tls(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, TlsMode::Implicit).await
    }

    async fn start_with(mailbox: Mailbox, mode: TlsMode) -> Self {
        // Several tests may race to install the provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));
        let logins = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            let logins = Arc::clone(&logins);
            async move {
                while let Ok((stream, _addr)) = listener.accept().await {
                    let acceptor = acceptor.clone();
                    let mailbox = Arc::clone(&mailbox);
                    let logins = Arc::clone(&logins);
                    tokio::spawn(async move {
                        match mode {
                            TlsMode::StartTls => {
                                handle_connection(stream, acceptor, &mailbox, &logins).await;
                            }
                            TlsMode::Implicit => {
                                handle_implicit_tls(stream, acceptor, &mailbox, &logins).await;
                            }
                        }
                    });
                }
            }
        });

        Self {
            port,
            mailbox,
            logins,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Number of successful LOGINs so far.
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Add a message with `uid` to `folder`.
    pub fn deliver(&self, folder: &str, uid: u32) {
        self.mailbox
            .lock()
            .unwrap()
            .folder_mut(folder)
            .expect("deliver into an existing folder")
            .uids
            .push(uid);
    }

    /// Replace the contents of `folder` under a new UIDVALIDITY, as a
    /// server does when a folder is recreated.
    pub fn recreate(&self, folder: &str, uid_validity: u32, uids: impl IntoIterator<Item = u32>) {
        let mut mailbox = self.mailbox.lock().unwrap();
        let folder = mailbox
            .folder_mut(folder)
            .expect("recreate an existing folder");
        folder.uid_validity = uid_validity;
        folder.uids = uids.into_iter().collect();
    }
}

/// Greeting and STARTTLS on the plain stream, then the command loop on
/// the TLS stream.
async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
    logins: &AtomicUsize,
) {
    let mut reader = BufReader::new(stream);

    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }
    let Some((tag, command)) = line.trim().split_once(' ') else {
        return;
    };
    if !command.eq_ignore_ascii_case("STARTTLS") {
        let _ = write_line(&mut reader, &format!("{tag} BAD Expected STARTTLS\r\n")).await;
        return;
    }
    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    if write_line(&mut reader, &resp).await.is_err() {
        return;
    }

    let Ok(tls_stream) = acceptor.accept(reader.into_inner()).await else {
        return;
    };
    handle_session(tls_stream, mailbox, logins).await;
}

/// TLS handshake, then greeting and the command loop on the TLS stream.
async fn handle_implicit_tls(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
    logins: &AtomicUsize,
) {
    let Ok(tls_stream) = acceptor.accept(stream).await else {
        return;
    };
    let mut reader = BufReader::new(tls_stream);
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }
    handle_session(reader.into_inner(), mailbox, logins).await;
}

fn mailbox_name(mailbox: &ImapMailbox<'_>) -> String {
    match mailbox {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

async fn handle_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mutex<Mailbox>,
    logins: &AtomicUsize,
) {
    let mut reader = BufReader::new(stream);
    let mut selected: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            if write_line(&mut reader, &format!("{tag} BAD Parse error\r\n"))
                .await
                .is_err()
            {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let snapshot = mailbox.lock().unwrap().clone();

        let written = match command.body {
            CommandBody::Capability => responses::capability(tag, &mut reader).await,
            CommandBody::Noop => responses::ok(tag, "NOOP", &mut reader).await,
            CommandBody::Login { .. } => {
                logins.fetch_add(1, Ordering::SeqCst);
                responses::ok(tag, "LOGIN", &mut reader).await
            }
            CommandBody::Select { mailbox: name, .. } => {
                let name = mailbox_name(&name);
                responses::select(tag, &name, &snapshot, &mut reader)
                    .await
                    .map(|folder| selected = folder)
            }
            CommandBody::Search { uid: true, .. } => {
                responses::uid_search(tag, &snapshot, selected.as_deref(), &mut reader).await
            }
            CommandBody::Logout => {
                let _ = responses::logout(tag, &mut reader).await;
                break;
            }
            _ => write_line(&mut reader, &format!("{tag} BAD Unknown command\r\n")).await,
        };

        if written.is_err() {
            break;
        }
    }
}
