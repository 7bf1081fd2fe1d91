//! NTFS-style security descriptors over the POSIX/NFSv4 ACL model.
//!
//! Owner and group SIDs come from a pluggable identity mapper. The DACL is
//! either translated from an explicit NFSv4-style ACL or synthesized from
//! the POSIX mode triad as five Allow ACEs (owner, group, everyone, system,
//! administrators). Parsing reverses the translation; DACLs arriving over
//! SET_INFO are tagged `smb_explicit` so the metadata store can prefer them
//! over mode synthesis.

use smb_dtyp::security::{Ace, AceFlags, AceType, Acl, AclRevision, SdControl, SecurityDescriptor, Sid};
use smb_msg::AdditionalInfo;

use crate::vfs::{FileNode, NFS_ACE_FLAG_INHERITED, NfsAce, NfsAceType, NfsAcl, SetAttrs};

/// Full control: FILE_ALL_ACCESS.
pub const ACCESS_FULL: u32 = 0x001f_01ff;
/// Read + read EA + read attributes + READ_CONTROL + SYNCHRONIZE.
pub const ACCESS_READ: u32 = 0x0012_0089;
/// Write + append + write EA + write attributes + READ_CONTROL + SYNCHRONIZE.
pub const ACCESS_WRITE: u32 = 0x0012_0116;
/// Execute + read attributes + READ_CONTROL + SYNCHRONIZE.
pub const ACCESS_EXECUTE: u32 = 0x0012_00a0;
/// READ_CONTROL | SYNCHRONIZE: the floor every principal gets.
pub const ACCESS_FLOOR: u32 = 0x0012_0000;

/// The Windows inherited-ACE flag bit.
const WIN_ACE_FLAG_INHERITED: u8 = 0x10;

/// Maps POSIX identities to SIDs and back.
pub trait IdentityMapper: Send + Sync {
    fn user_sid(&self, uid: u32) -> Sid;
    fn group_sid(&self, gid: u32) -> Sid;
    /// Reverses a SID to a UID, when it is one of this mapper's user SIDs.
    fn sid_to_uid(&self, sid: &Sid) -> Option<u32>;
    fn sid_to_gid(&self, sid: &Sid) -> Option<u32>;
}

/// The default mapper: `S-1-5-21-<m1>-<m2>-<m3>-<rid>` with the Samba-style
/// algorithmic RID scheme (even RIDs for users, odd for groups).
pub struct AlgorithmicMapper {
    machine: [u32; 3],
}

impl AlgorithmicMapper {
    pub fn new(machine: [u32; 3]) -> Self {
        AlgorithmicMapper { machine }
    }

    fn domain_sid(&self, rid: u32) -> Sid {
        Sid::new(5, vec![21, self.machine[0], self.machine[1], self.machine[2], rid])
    }

    fn is_domain(&self, sid: &Sid) -> bool {
        sid.authority() == 5
            && sid.sub_authority.len() == 5
            && sid.sub_authority[0] == 21
            && sid.sub_authority[1..4] == self.machine
    }
}

impl Default for AlgorithmicMapper {
    fn default() -> Self {
        AlgorithmicMapper::new([0x0c17_a05d, 0x157f_00d0, 0x5eed_cafe])
    }
}

impl IdentityMapper for AlgorithmicMapper {
    fn user_sid(&self, uid: u32) -> Sid {
        self.domain_sid(uid * 2 + 1000)
    }

    fn group_sid(&self, gid: u32) -> Sid {
        self.domain_sid(gid * 2 + 1001)
    }

    fn sid_to_uid(&self, sid: &Sid) -> Option<u32> {
        let rid = sid.rid()?;
        if self.is_domain(sid) && rid >= 1000 && rid % 2 == 0 {
            Some((rid - 1000) / 2)
        } else {
            None
        }
    }

    fn sid_to_gid(&self, sid: &Sid) -> Option<u32> {
        let rid = sid.rid()?;
        if self.is_domain(sid) && rid >= 1001 && rid % 2 == 1 {
            Some((rid - 1001) / 2)
        } else {
            None
        }
    }
}

/// The access mask a POSIX permission triad grants.
fn triad_mask(bits: u32) -> u32 {
    let mut mask = ACCESS_FLOOR;
    if bits & 0o4 != 0 {
        mask |= ACCESS_READ;
    }
    if bits & 0o2 != 0 {
        mask |= ACCESS_WRITE;
    }
    if bits & 0o1 != 0 {
        mask |= ACCESS_EXECUTE;
    }
    mask
}

fn who_to_sid(mapper: &dyn IdentityMapper, who: &str, node: &FileNode) -> Sid {
    match who {
        "OWNER@" => mapper.user_sid(node.uid),
        "GROUP@" => mapper.group_sid(node.gid),
        "EVERYONE@" => Sid::everyone(),
        "SYSTEM@" => Sid::local_system(),
        "ADMINISTRATORS@" => Sid::administrators(),
        other => {
            if let Some(uid) = other.strip_prefix("uid:").and_then(|v| v.parse().ok()) {
                mapper.user_sid(uid)
            } else if let Some(gid) = other.strip_prefix("gid:").and_then(|v| v.parse().ok()) {
                mapper.group_sid(gid)
            } else {
                Sid::everyone()
            }
        }
    }
}

fn sid_to_who(mapper: &dyn IdentityMapper, sid: &Sid, owner: &Sid, group: &Sid) -> String {
    if sid == owner {
        return "OWNER@".to_string();
    }
    if sid == group {
        return "GROUP@".to_string();
    }
    if *sid == Sid::everyone() {
        return "EVERYONE@".to_string();
    }
    if *sid == Sid::local_system() {
        return "SYSTEM@".to_string();
    }
    if *sid == Sid::administrators() {
        return "ADMINISTRATORS@".to_string();
    }
    if let Some(uid) = mapper.sid_to_uid(sid) {
        return format!("uid:{uid}");
    }
    if let Some(gid) = mapper.sid_to_gid(sid) {
        return format!("gid:{gid}");
    }
    "EVERYONE@".to_string()
}

fn nfs_flags_to_windows(flags: u32) -> AceFlags {
    let mut out = AceFlags::new();
    if flags & NFS_ACE_FLAG_INHERITED != 0 {
        out.set_inherited(true);
    }
    out
}

fn windows_flags_to_nfs(flags: AceFlags) -> u32 {
    let bytes = AceFlags::into_bytes(flags);
    if bytes[0] & WIN_ACE_FLAG_INHERITED != 0 { NFS_ACE_FLAG_INHERITED } else { 0 }
}

/// Synthesizes the five-ACE Allow DACL from the POSIX mode.
fn synthesize_acl(mode: u32) -> NfsAcl {
    NfsAcl {
        aces: vec![
            NfsAce {
                ace_type: NfsAceType::Allow,
                flags: 0,
                access_mask: triad_mask((mode >> 6) & 0o7),
                who: "OWNER@".into(),
            },
            NfsAce {
                ace_type: NfsAceType::Allow,
                flags: 0,
                access_mask: triad_mask((mode >> 3) & 0o7),
                who: "GROUP@".into(),
            },
            NfsAce {
                ace_type: NfsAceType::Allow,
                flags: 0,
                access_mask: triad_mask(mode & 0o7),
                who: "EVERYONE@".into(),
            },
            NfsAce {
                ace_type: NfsAceType::Allow,
                flags: 0,
                access_mask: ACCESS_FULL,
                who: "SYSTEM@".into(),
            },
            NfsAce {
                ace_type: NfsAceType::Allow,
                flags: 0,
                access_mask: ACCESS_FULL,
                who: "ADMINISTRATORS@".into(),
            },
        ],
        smb_explicit: false,
        auto_inherited: false,
        protected: false,
    }
}

/// Builds the self-relative security descriptor for a file, honoring the
/// AdditionalInformation selector bits.
pub fn build_security_descriptor(
    mapper: &dyn IdentityMapper,
    node: &FileNode,
    selector: AdditionalInfo,
) -> SecurityDescriptor {
    let acl = node.acl.clone().unwrap_or_else(|| synthesize_acl(node.mode));

    let mut sd = SecurityDescriptor {
        control: SdControl::new()
            .with_dacl_auto_inherited(acl.auto_inherited)
            .with_dacl_protected(acl.protected),
        ..SecurityDescriptor::default()
    };
    if selector.owner_security_information() {
        sd.owner_sid = Some(mapper.user_sid(node.uid));
    }
    if selector.group_security_information() {
        sd.group_sid = Some(mapper.group_sid(node.gid));
    }
    if selector.dacl_security_information() {
        let ace = acl
            .aces
            .iter()
            .map(|ace| Ace {
                ace_type: match ace.ace_type {
                    NfsAceType::Allow => AceType::AccessAllowed,
                    NfsAceType::Deny => AceType::AccessDenied,
                    NfsAceType::Audit => AceType::SystemAudit,
                },
                ace_flags: nfs_flags_to_windows(ace.flags),
                access_mask: ace.access_mask,
                sid: who_to_sid(mapper, &ace.who, node),
            })
            .collect();
        sd.dacl = Some(Acl { acl_revision: AclRevision::Nt4, ace });
    }
    if selector.sacl_security_information() {
        // No auditing: an empty-SACL stub.
        sd.sacl = Some(Acl::empty());
    }
    sd
}

/// Translates a SET_INFO security descriptor into attribute changes,
/// filtered by the selector bits.
pub fn security_descriptor_to_attrs(
    mapper: &dyn IdentityMapper,
    sd: &SecurityDescriptor,
    selector: AdditionalInfo,
) -> SetAttrs {
    let mut attrs = SetAttrs::default();
    if selector.owner_security_information() {
        attrs.uid = sd.owner_sid.as_ref().and_then(|sid| mapper.sid_to_uid(sid));
    }
    if selector.group_security_information() {
        attrs.gid = sd.group_sid.as_ref().and_then(|sid| mapper.sid_to_gid(sid));
    }
    if selector.dacl_security_information() {
        if let Some(dacl) = &sd.dacl {
            let owner = sd.owner_sid.clone().unwrap_or_else(Sid::everyone);
            let group = sd.group_sid.clone().unwrap_or_else(Sid::everyone);
            let aces = dacl
                .ace
                .iter()
                .map(|ace| NfsAce {
                    ace_type: match ace.ace_type {
                        AceType::AccessAllowed => NfsAceType::Allow,
                        AceType::AccessDenied => NfsAceType::Deny,
                        AceType::SystemAudit => NfsAceType::Audit,
                    },
                    flags: windows_flags_to_nfs(ace.ace_flags),
                    access_mask: ace.access_mask,
                    who: sid_to_who(mapper, &ace.sid, &owner, &group),
                })
                .collect();
            attrs.acl = Some(NfsAcl {
                aces,
                smb_explicit: true,
                auto_inherited: sd.control.dacl_auto_inherited(),
                protected: sd.control.dacl_protected(),
            });
        }
    }
    attrs
}

/// Computes the maximal access mask for the MxAc create context: the union
/// of the triads that apply to the caller, with READ_CONTROL | SYNCHRONIZE
/// as the floor, and full control for the owner.
pub fn maximal_access(node: &FileNode, uid: u32, gid: u32, gids: &[u32]) -> u32 {
    if uid == node.uid || uid == 0 {
        return ACCESS_FULL;
    }
    let mut mask = ACCESS_FLOOR;
    if gid == node.gid || gids.contains(&node.gid) {
        mask |= triad_mask((node.mode >> 3) & 0o7);
    }
    mask |= triad_mask(node.mode & 0o7);
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_dtyp::binrw_util::prelude::FileTime;
    use crate::vfs::{FileHandle, FileKind};

    fn node(mode: u32, acl: Option<NfsAcl>) -> FileNode {
        FileNode {
            handle: FileHandle(vec![1]),
            file_uuid: [9; 16],
            kind: FileKind::Regular,
            size: 0,
            nlink: 1,
            uid: 1000,
            gid: 100,
            mode,
            hidden: false,
            atime: FileTime::ZERO,
            mtime: FileTime::ZERO,
            ctime: FileTime::ZERO,
            crtime: FileTime::ZERO,
            symlink_target: None,
            payload_id: String::new(),
            acl,
        }
    }

    fn selector_all() -> AdditionalInfo {
        AdditionalInfo::new()
            .with_owner_security_information(true)
            .with_group_security_information(true)
            .with_dacl_security_information(true)
    }

    #[test]
    fn synthesized_dacl_has_five_allow_aces() {
        let mapper = AlgorithmicMapper::default();
        for mode in [0o644, 0o750, 0o755] {
            let sd = build_security_descriptor(&mapper, &node(mode, None), selector_all());
            let dacl = sd.dacl.as_ref().unwrap();
            assert_eq!(dacl.ace.len(), 5);
            assert!(dacl.ace.iter().all(|ace| ace.ace_type == AceType::AccessAllowed));
        }
    }

    #[test]
    fn descriptor_round_trips_identity() {
        let mapper = AlgorithmicMapper::default();
        let source = node(0o750, None);
        let sd = build_security_descriptor(&mapper, &source, selector_all());
        let parsed = SecurityDescriptor::parse(&sd.to_bytes()).unwrap();
        let attrs = security_descriptor_to_attrs(&mapper, &parsed, selector_all());
        assert_eq!(attrs.uid, Some(1000));
        assert_eq!(attrs.gid, Some(100));
        let acl = attrs.acl.unwrap();
        assert!(acl.smb_explicit);
        assert_eq!(acl.aces.len(), 5);
        assert_eq!(acl.aces[0].who, "OWNER@");
        assert_eq!(acl.aces[0].access_mask, ACCESS_READ | ACCESS_WRITE | ACCESS_EXECUTE);
    }

    #[test]
    fn explicit_acl_passes_through_with_inherit_flag() {
        let mapper = AlgorithmicMapper::default();
        let acl = NfsAcl {
            aces: vec![NfsAce {
                ace_type: NfsAceType::Deny,
                flags: NFS_ACE_FLAG_INHERITED,
                access_mask: ACCESS_WRITE,
                who: "EVERYONE@".into(),
            }],
            smb_explicit: false,
            auto_inherited: true,
            protected: false,
        };
        let sd = build_security_descriptor(&mapper, &node(0o644, Some(acl)), selector_all());
        let dacl = sd.dacl.as_ref().unwrap();
        assert_eq!(dacl.ace[0].ace_type, AceType::AccessDenied);
        assert!(dacl.ace[0].ace_flags.inherited());
        assert!(sd.control.dacl_auto_inherited());

        let attrs = security_descriptor_to_attrs(&mapper, &sd, selector_all());
        assert_eq!(attrs.acl.unwrap().aces[0].flags, NFS_ACE_FLAG_INHERITED);
    }

    #[test]
    fn sacl_request_emits_empty_stub() {
        let mapper = AlgorithmicMapper::default();
        let sd = build_security_descriptor(
            &mapper,
            &node(0o644, None),
            AdditionalInfo::new().with_sacl_security_information(true),
        );
        assert_eq!(sd.sacl, Some(Acl::empty()));
        assert!(sd.dacl.is_none());
        let bytes = sd.to_bytes();
        let parsed = SecurityDescriptor::parse(&bytes).unwrap();
        assert!(parsed.control.sacl_present());
    }

    #[test]
    fn maximal_access_levels() {
        let file = node(0o640, None);
        assert_eq!(maximal_access(&file, 1000, 1, &[]), ACCESS_FULL);
        assert_eq!(maximal_access(&file, 2000, 100, &[]), ACCESS_FLOOR | ACCESS_READ);
        assert_eq!(maximal_access(&file, 2000, 7, &[]), ACCESS_FLOOR);
    }

    #[test]
    fn algorithmic_mapper_round_trips() {
        let mapper = AlgorithmicMapper::default();
        assert_eq!(mapper.sid_to_uid(&mapper.user_sid(1000)), Some(1000));
        assert_eq!(mapper.sid_to_gid(&mapper.group_sid(100)), Some(100));
        assert_eq!(mapper.sid_to_uid(&mapper.group_sid(100)), None);
        assert_eq!(mapper.sid_to_uid(&Sid::everyone()), None);
    }
}
