//! A minimal gateway: one in-memory share, guest and password login.
//!
//! Run with `cargo run --example memshare`, then e.g.
//! `smbclient //127.0.0.1/scratch -p 4450 -U alice%letmein`.

use std::sync::Arc;

use smb_srv::auth::ntlm;
use smb_srv::memfs::MemFs;
use smb_srv::{ServerConfig, ServerContext, ShareConfig, SmbListener, User};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let fs = Arc::new(
        MemFs::new("scratch")
            .with_user(User::new("alice", 1000, 1000, Some(ntlm::nt_hash("letmein")))),
    );

    let mut config = ServerConfig::default();
    config.server_name = "MEMSHARE".to_string();
    config.shares.push(ShareConfig::new("scratch"));

    let ctx = Arc::new(ServerContext::new(config, fs.clone(), fs.clone(), fs));
    let listener = SmbListener::bind("127.0.0.1:4450", ctx).await?;
    listener.handle_forever().await
}
