//! Per-connection dispatch: framing, decryption, compound chains,
//! signature verification, credit accounting, and response assembly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use binrw::prelude::*;
use smb_msg::{
    Command, Dialect, EncryptedMessage, ErrorResponse, FileId, Header, PlainResponse,
    RequestContent, ResponseContent, Status,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::MAX_TRANSACT_SIZE;
use crate::crypto::{ConnCrypto, SessionCrypto};
use crate::handlers::{self, Reply};
use crate::notify::NotifyOutcome;
use crate::server::ServerContext;

/// Largest frame accepted from the transport: the data ceiling plus header
/// and transform overhead.
const MAX_FRAME: usize = MAX_TRANSACT_SIZE as usize + 0x1000;

pub(crate) struct Connection {
    pub ctx: Arc<ServerContext>,
    pub crypto: ConnCrypto,
    pub client_addr: SocketAddr,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Sessions established on this connection, torn down with it.
    pub sessions: Vec<u64>,
    /// FileId carried forward through a related-operations chain.
    pub chain_file_id: Option<FileId>,
    /// Session-ID override for the in-flight response (SESSION_SETUP
    /// allocates the ID it responds with).
    pub reply_session_id: Option<u64>,
    /// Tree-ID override for the in-flight response (TREE_CONNECT allocates
    /// the ID it responds with).
    pub reply_tree_id: Option<u32>,
    next_async_id: u64,
}

impl Connection {
    /// Runs one accepted transport connection to completion.
    pub async fn run(
        ctx: Arc<ServerContext>,
        socket: TcpStream,
        client_addr: SocketAddr,
    ) -> io::Result<()> {
        socket.set_nodelay(true).ok();
        let (mut reader, mut writer) = socket.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let write_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let header = (frame.len() as u32).to_be_bytes();
                if writer.write_all(&header).await.is_err() {
                    break;
                }
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let mut conn = Connection {
            ctx: ctx.clone(),
            crypto: ConnCrypto::default(),
            client_addr,
            out_tx,
            sessions: Vec::new(),
            chain_file_id: None,
            reply_session_id: None,
            reply_tree_id: None,
            next_async_id: 1,
        };

        let result = conn.read_loop(&mut reader).await;

        // Transport teardown cascades: sessions, trees, handles, locks.
        for session_id in conn.sessions.clone() {
            conn.teardown_session(session_id).await;
        }
        drop(conn);
        write_task.abort();
        result
    }

    async fn read_loop(&mut self, reader: &mut (impl AsyncReadExt + Unpin)) -> io::Result<()> {
        loop {
            let mut frame_header = [0u8; 4];
            match reader.read_exact(&mut frame_header).await {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err),
            }
            if frame_header[0] != 0 {
                return Err(io::Error::other("unexpected NetBIOS message type"));
            }
            let length = u32::from_be_bytes(frame_header) as usize;
            if length < Header::STRUCT_SIZE || length > MAX_FRAME {
                return Err(io::Error::other("invalid frame length"));
            }
            let mut frame = vec![0u8; length];
            reader.read_exact(&mut frame).await?;
            self.process_frame(frame).await;
        }
    }

    async fn process_frame(&mut self, frame: Vec<u8>) {
        if frame.starts_with(b"\xfdSMB") {
            let parsed = EncryptedMessage::read_le(&mut std::io::Cursor::new(&frame));
            let Ok(message) = parsed else {
                log::warn!("dropping malformed transform header from {}", self.client_addr);
                return;
            };
            let session_id = message.header.session_id;
            let Some(crypto) = self.session_crypto(session_id) else {
                log::warn!("transform for unknown session {session_id:#x}");
                return;
            };
            match crypto.decrypt_message(&message) {
                Ok(plain) => self.dispatch_compound(plain, true).await,
                Err(status) => {
                    log::warn!("decryption failed for session {session_id:#x}: {status}");
                }
            }
        } else {
            self.dispatch_compound(frame, false).await;
        }
    }

    fn session_crypto(&self, session_id: u64) -> Option<SessionCrypto> {
        self.ctx.state.session(session_id).and_then(|s| s.crypto.get().cloned())
    }

    /// Splits a frame into its chained messages, runs each handler, and
    /// sends the re-chained responses.
    async fn dispatch_compound(&mut self, frame: Vec<u8>, encrypted: bool) {
        let mut responses: Vec<Vec<u8>> = Vec::new();
        let mut offset = 0usize;
        self.chain_file_id = None;
        let mut chain_session_id = 0u64;
        let mut chain_tree_id = 0u32;
        let mut encrypt_session = 0u64;

        while offset < frame.len() {
            let chunk_slice = &frame[offset..];
            let mut cursor = std::io::Cursor::new(chunk_slice);
            let Ok(mut header) = Header::read_le(&mut cursor) else {
                log::warn!("dropping frame with malformed header from {}", self.client_addr);
                break;
            };
            let chunk_len = if header.next_command != 0 {
                (header.next_command as usize).min(chunk_slice.len())
            } else {
                chunk_slice.len()
            };
            let chunk = &chunk_slice[..chunk_len];
            let last = header.next_command == 0;

            if header.flags.related_operations() {
                if header.session_id == u64::MAX || header.session_id == 0 {
                    header.session_id = chain_session_id;
                }
                if header.tree_id == Some(u32::MAX) || header.tree_id == Some(0) {
                    header.tree_id = Some(chain_tree_id);
                }
            } else {
                self.chain_file_id = None;
            }

            let reply = self.process_one(&header, chunk).await;
            chain_session_id = self.reply_session_id.unwrap_or(header.session_id);
            chain_tree_id = self.reply_tree_id.or(header.tree_id).unwrap_or(0);
            if encrypt_session == 0 {
                encrypt_session = chain_session_id;
            }

            match reply {
                Reply::NoResponse => {}
                Reply::Async(receiver) => {
                    let async_id = self.next_async_id;
                    self.next_async_id += 1;
                    responses.push(self.build_interim(&header, async_id));
                    self.spawn_notify_finisher(&header, async_id, encrypted, receiver);
                }
                Reply::Ok(content) => {
                    responses.push(self.build_response(&header, Status::Success, content));
                }
                Reply::WithStatus(status, content) => {
                    responses.push(self.build_response(&header, status, content));
                }
                Reply::Error(status) => {
                    responses.push(self.build_response(
                        &header,
                        status,
                        ResponseContent::Error(ErrorResponse::default()),
                    ));
                }
            }
            self.reply_session_id = None;
            self.reply_tree_id = None;

            if last {
                break;
            }
            offset += chunk_len;
        }

        if responses.is_empty() {
            return;
        }

        // Re-chain: pad every response but the last to 8 bytes and patch
        // next_command, then sign each finished chunk.
        let count = responses.len();
        let mut out = Vec::new();
        for (i, mut response) in responses.into_iter().enumerate() {
            if i + 1 != count {
                let padded = response.len().next_multiple_of(8);
                response.resize(padded, 0);
                response[20..24].copy_from_slice(&(padded as u32).to_le_bytes());
            }
            self.sign_response(&mut response);
            out.extend_from_slice(&response);
        }

        if encrypted {
            if let Some(crypto) = self.session_crypto(encrypt_session) {
                if let Some(sealed) = crypto.encrypt_message(&out, encrypt_session) {
                    let mut cursor = std::io::Cursor::new(Vec::new());
                    if sealed.write_le(&mut cursor).is_ok() {
                        let _ = self.out_tx.send(cursor.into_inner());
                        return;
                    }
                }
            }
            log::warn!("failed to encrypt response for session {encrypt_session:#x}");
            return;
        }
        let _ = self.out_tx.send(out);
    }

    /// Verifies the signature (when applicable), parses the body, and runs
    /// the handler for a single message.
    async fn process_one(&mut self, header: &Header, chunk: &[u8]) -> Reply {
        let command = match header.command() {
            Some(command) => command,
            None => {
                log::debug!("unknown opcode {:#x} from {}", header.command, self.client_addr);
                return Reply::Error(Status::NotSupported);
            }
        };

        // Signed messages are verified against the session key, except the
        // initial NEGOTIATE/SESSION_SETUP legs.
        if header.flags.signed()
            && !matches!(command, Command::Negotiate | Command::SessionSetup)
        {
            if let Some(crypto) = self.session_crypto(header.session_id) {
                if crypto.signing_enabled && !crypto.verify_message(chunk) {
                    log::warn!("signature verification failed for {} from {}", command, self.client_addr);
                    return Reply::Error(Status::AccessDenied);
                }
            }
        }

        let mut cursor = std::io::Cursor::new(chunk);
        cursor.set_position(Header::STRUCT_SIZE as u64);
        let content = match RequestContent::read_le_args(&mut cursor, (command,)) {
            Ok(content) => content,
            Err(err) => {
                log::debug!("malformed {} request from {}: {}", command, self.client_addr, err);
                return Reply::Error(Status::InvalidParameter);
            }
        };

        // 3.1.1 hashes every SESSION_SETUP request into the preauth chain.
        if command == Command::SessionSetup {
            self.crypto.update_preauth(chunk);
        }

        let reply = handlers::dispatch(self, header, content).await;

        // NEGOTIATE starts the preauth chain once 3.1.1 is selected: hash
        // the request, then the response, inside build_response below.
        if command == Command::Negotiate && self.crypto.dialect == Some(Dialect::Smb0311) {
            self.crypto.preauth_hash = [0u8; 64];
            self.crypto.update_preauth(chunk);
        }
        reply
    }

    fn grant_credits(&self, requested: u16) -> u16 {
        requested.clamp(1, self.ctx.config.max_credits)
    }

    fn build_response(&mut self, header: &Header, status: Status, content: ResponseContent) -> Vec<u8> {
        let mut response = PlainResponse::for_request(header, status, content);
        response.header.credit_request = self.grant_credits(header.credit_request);
        if let Some(session_id) = self.reply_session_id {
            response.header.session_id = session_id;
        }
        if let Some(tree_id) = self.reply_tree_id {
            response.header.tree_id = Some(tree_id);
        }
        let bytes = response.to_bytes();

        // Continue the preauth chain over NEGOTIATE and intermediate
        // SESSION_SETUP responses.
        let command = header.command();
        if command == Some(Command::Negotiate)
            || (command == Some(Command::SessionSetup)
                && status == Status::MoreProcessingRequired)
        {
            self.crypto.update_preauth(&bytes);
        }
        bytes
    }

    fn build_interim(&mut self, header: &Header, async_id: u64) -> Vec<u8> {
        let mut response = PlainResponse::for_request(
            header,
            Status::Pending,
            ResponseContent::Error(ErrorResponse::default()),
        );
        response.header.to_async(async_id);
        response.header.flags.set_server_to_redir(true);
        // Interim responses grant no credits.
        response.header.credit_request = 0;
        response.to_bytes()
    }

    fn sign_response(&self, response: &mut [u8]) {
        if response.len() < Header::STRUCT_SIZE {
            return;
        }
        let command = u16::from_le_bytes(response[12..14].try_into().unwrap());
        if command == Command::Negotiate as u16 {
            return;
        }
        let session_id = u64::from_le_bytes(response[40..48].try_into().unwrap());
        if let Some(crypto) = self.session_crypto(session_id) {
            if crypto.signing_enabled {
                // Mark the response signed before computing the signature.
                response[16] |= 0x08;
                crypto.sign_message(response);
            }
        }
    }

    /// Parks a CHANGE_NOTIFY: when the registration completes, the final
    /// async response is signed and sent from this task.
    fn spawn_notify_finisher(
        &self,
        header: &Header,
        async_id: u64,
        encrypted: bool,
        receiver: tokio::sync::oneshot::Receiver<NotifyOutcome>,
    ) {
        let out_tx = self.out_tx.clone();
        let ctx = self.ctx.clone();
        let request_header = header.clone();
        tokio::spawn(async move {
            let outcome = match receiver.await {
                Ok(outcome) => outcome,
                Err(_) => NotifyOutcome::Status(Status::NotifyCleanup),
            };
            let (status, content) = match outcome {
                NotifyOutcome::Changes(records) => (
                    Status::Success,
                    ResponseContent::ChangeNotify(smb_msg::ChangeNotifyResponse {
                        buffer: records.into_iter().collect(),
                    }),
                ),
                NotifyOutcome::Status(status) => {
                    (status, ResponseContent::Error(ErrorResponse::default()))
                }
            };
            let mut response = PlainResponse::for_request(&request_header, status, content);
            response.header.to_async(async_id);
            response.header.credit_request = 0;
            let mut bytes = response.to_bytes();

            let session_id = request_header.session_id;
            let crypto = ctx.state.session(session_id).and_then(|s| s.crypto.get().cloned());
            if let Some(crypto) = &crypto {
                if crypto.signing_enabled {
                    bytes[16] |= 0x08;
                    crypto.sign_message(&mut bytes);
                }
            }
            if encrypted {
                if let Some(crypto) = &crypto {
                    if let Some(sealed) = crypto.encrypt_message(&bytes, session_id) {
                        let mut cursor = std::io::Cursor::new(Vec::new());
                        if sealed.write_le(&mut cursor).is_ok() {
                            let _ = out_tx.send(cursor.into_inner());
                        }
                        return;
                    }
                }
            }
            let _ = out_tx.send(bytes);
        });
    }

    /// Removes one session and runs the CLOSE cleanup list over every
    /// handle it still owned.
    pub(crate) async fn teardown_session(&mut self, session_id: u64) {
        let Some(session) = self.ctx.state.session(session_id) else {
            return;
        };
        let auth = session.auth_context();
        let orphans = self.ctx.state.remove_session(session_id);
        for open in orphans {
            let open = open.lock().await;
            handlers::close::cleanup_open(&self.ctx, &auth, &open).await;
        }
        self.sessions.retain(|id| *id != session_id);
    }
}
