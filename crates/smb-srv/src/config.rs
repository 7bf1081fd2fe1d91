//! Server configuration.

use std::time::Duration;

use smb_msg::Dialect;

use crate::vfs::SharePermission;

/// Root-UID squash rules, analogous to NFS root-squash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SquashMode {
    /// No squashing; UID 0 gets administrative access.
    #[default]
    None,
    /// UID 0 is remapped but still granted administrative share access.
    RootToAdmin,
    /// Every user is remapped; administrative share access is still granted
    /// to UID 0.
    AllToAdmin,
    /// UID 0 is remapped and gets no special share access.
    Root,
    /// Every user is remapped; no special share access.
    All,
}

impl SquashMode {
    /// Whether UID 0 is granted administrative access under this mode.
    pub fn admin_for_root(&self) -> bool {
        matches!(self, SquashMode::None | SquashMode::RootToAdmin | SquashMode::AllToAdmin)
    }
}

/// One exported share.
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Normalized share name: lowercase, no slashes.
    pub name: String,
    pub read_only: bool,
    pub squash: SquashMode,
    /// Permission granted when the user store has no explicit entry.
    pub default_permission: SharePermission,
}

impl ShareConfig {
    pub fn new(name: &str) -> Self {
        ShareConfig {
            name: name.trim_matches('/').to_ascii_lowercase(),
            read_only: false,
            squash: SquashMode::default(),
            default_permission: SharePermission::ReadWrite,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// NetBIOS/host name reported in NTLM challenges.
    pub server_name: String,
    pub min_dialect: Dialect,
    pub max_dialect: Dialect,
    /// Require signing on authenticated sessions.
    pub require_signing: bool,
    /// Per-connection credit window cap.
    pub max_credits: u16,
    /// Lifetime of an unanswered NTLM challenge.
    pub auth_timeout: Duration,
    pub shares: Vec<ShareConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_name: "GATEWAY".to_string(),
            min_dialect: Dialect::MIN,
            max_dialect: Dialect::MAX,
            require_signing: false,
            max_credits: 512,
            auth_timeout: Duration::from_secs(60),
            shares: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Looks up a share by its normalized name. `ipc$` is virtual and not
    /// listed here.
    pub fn share(&self, name: &str) -> Option<&ShareConfig> {
        self.shares.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squash_admin_rules() {
        assert!(SquashMode::None.admin_for_root());
        assert!(SquashMode::RootToAdmin.admin_for_root());
        assert!(SquashMode::AllToAdmin.admin_for_root());
        assert!(!SquashMode::Root.admin_for_root());
        assert!(!SquashMode::All.admin_for_root());
    }

    #[test]
    fn share_names_are_normalized() {
        assert_eq!(ShareConfig::new("/Projects/").name, "projects");
    }
}
