//! Server assembly: the shared context and the TCP accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_dtyp::guid::Guid;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::notify::NotifyRegistry;
use crate::oplocks::OplockManager;
use crate::sd::{AlgorithmicMapper, IdentityMapper};
use crate::state::ServerState;
use crate::vfs::{ContentStore, KerberosProvider, MetadataStore, UserStore};

/// Everything the handlers share: configuration, collaborators, and the
/// process-wide tables. Immutable after construction; interior mutability
/// lives inside the tables.
pub struct ServerContext {
    pub config: ServerConfig,
    pub metadata: Arc<dyn MetadataStore>,
    pub content: Arc<dyn ContentStore>,
    pub users: Arc<dyn UserStore>,
    pub kerberos: Option<Arc<dyn KerberosProvider>>,
    pub mapper: Arc<dyn IdentityMapper>,
    pub state: ServerState,
    pub oplocks: OplockManager,
    pub notifications: NotifyRegistry,
    pub server_guid: Guid,
    pub start_time: FileTime,
    /// Persistent half of every FileId issued by this incarnation; stale
    /// IDs from earlier incarnations fail to resolve.
    pub engine_tag: u64,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        metadata: Arc<dyn MetadataStore>,
        content: Arc<dyn ContentStore>,
        users: Arc<dyn UserStore>,
    ) -> ServerContext {
        let server_guid = Guid::generate();
        let engine_tag = u64::from_le_bytes(server_guid.to_bytes()[0..8].try_into().unwrap());
        ServerContext {
            config,
            metadata,
            content,
            users,
            kerberos: None,
            mapper: Arc::new(AlgorithmicMapper::default()),
            state: ServerState::new(),
            oplocks: OplockManager::new(),
            notifications: NotifyRegistry::new(),
            server_guid,
            start_time: FileTime::now(),
            engine_tag,
        }
    }

    /// Attaches a Kerberos keytab provider; without one, only NTLM and
    /// guest access are offered.
    pub fn with_kerberos(mut self, provider: Arc<dyn KerberosProvider>) -> Self {
        self.kerberos = Some(provider);
        self
    }

    /// Replaces the default algorithmic SID mapper.
    pub fn with_mapper(mut self, mapper: Arc<dyn IdentityMapper>) -> Self {
        self.mapper = mapper;
        self
    }
}

/// The SMB TCP listener: accepts connections and runs each on its own task.
pub struct SmbListener {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl SmbListener {
    /// Binds to `addr` (e.g. `"0.0.0.0:445"`).
    pub async fn bind(addr: &str, ctx: Arc<ServerContext>) -> io::Result<SmbListener> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        Ok(SmbListener { listener, ctx })
    }

    /// The actual bound address; useful after binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails. Each connection gets
    /// its own task; transport teardown cascades to the connection's
    /// sessions, trees, handles and locks.
    pub async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            log::info!("accepted connection from {peer}");
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(err) = Connection::run(ctx, socket, peer).await {
                    log::debug!("connection {peer} closed: {err}");
                }
            });
        }
    }
}
