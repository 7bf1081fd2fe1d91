//! A minimal DCE/RPC endpoint for the `srvsvc` pipe: bind and
//! NetrShareEnum, enough for clients to list the gateway's shares over
//! IPC$.

use byteorder::{ByteOrder, LittleEndian};

const PTYPE_REQUEST: u8 = 0;
const PTYPE_RESPONSE: u8 = 2;
const PTYPE_BIND: u8 = 11;
const PTYPE_BIND_ACK: u8 = 12;
const PTYPE_FAULT: u8 = 3;

/// First+last fragment flags.
const PFC_FIRST_LAST: u8 = 0x03;

const OPNUM_NETR_SHARE_ENUM: u16 = 15;

/// NDR32 transfer syntax: 8a885d04-1ceb-11c9-9fe8-08002b104860 v2.
const NDR32_SYNTAX: [u8; 20] = [
    0x04, 0x5d, 0x88, 0x8a, 0xeb, 0x1c, 0xc9, 0x11, 0x9f, 0xe8, 0x08, 0x00, 0x2b, 0x10, 0x48,
    0x60, 0x02, 0x00, 0x00, 0x00,
];

const STYPE_DISKTREE: u32 = 0x0000_0000;
const STYPE_IPC_HIDDEN: u32 = 0x8000_0003;

/// A share advertised by NetrShareEnum.
#[derive(Debug, Clone)]
pub struct RpcShare {
    pub name: String,
    pub is_ipc: bool,
    pub remark: String,
}

/// Processes one DCE/RPC PDU written into the pipe; returns the serialized
/// reply to buffer for the next READ. Malformed input yields `None` (the
/// write still succeeds, the pipe just has nothing to say).
pub fn handle_pdu(input: &[u8], shares: &[RpcShare]) -> Option<Vec<u8>> {
    if input.len() < 16 || input[0] != 5 {
        return None;
    }
    let ptype = input[2];
    let call_id = LittleEndian::read_u32(&input[12..16]);
    match ptype {
        PTYPE_BIND => Some(bind_ack(call_id)),
        PTYPE_REQUEST => {
            if input.len() < 24 {
                return None;
            }
            let opnum = LittleEndian::read_u16(&input[22..24]);
            match opnum {
                OPNUM_NETR_SHARE_ENUM => {
                    Some(response(call_id, &share_enum_stub(shares)))
                }
                _ => Some(fault(call_id, 0x1c01_0002 /* nca_op_rng_error */)),
            }
        }
        _ => None,
    }
}

fn header(ptype: u8, call_id: u32, frag_length: u16) -> Vec<u8> {
    let mut out = vec![
        5, 0, // version
        ptype,
        PFC_FIRST_LAST,
        0x10, 0, 0, 0, // little-endian data representation
    ];
    out.extend_from_slice(&frag_length.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // auth length
    out.extend_from_slice(&call_id.to_le_bytes());
    out
}

fn bind_ack(call_id: u32) -> Vec<u8> {
    let sec_addr = b"\\PIPE\\srvsvc\0";
    let mut body = Vec::new();
    body.extend_from_slice(&4280u16.to_le_bytes()); // max xmit frag
    body.extend_from_slice(&4280u16.to_le_bytes()); // max recv frag
    body.extend_from_slice(&0x1234u32.to_le_bytes()); // assoc group
    body.extend_from_slice(&(sec_addr.len() as u16).to_le_bytes());
    body.extend_from_slice(sec_addr);
    while (body.len() + 16) % 4 != 0 {
        body.push(0);
    }
    body.push(1); // one result
    body.extend_from_slice(&[0, 0, 0]);
    body.extend_from_slice(&0u16.to_le_bytes()); // acceptance
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&NDR32_SYNTAX);

    let mut out = header(PTYPE_BIND_ACK, call_id, (16 + body.len()) as u16);
    out.extend_from_slice(&body);
    out
}

fn response(call_id: u32, stub: &[u8]) -> Vec<u8> {
    let mut out = header(PTYPE_RESPONSE, call_id, (24 + stub.len()) as u16);
    out.extend_from_slice(&(stub.len() as u32).to_le_bytes()); // alloc hint
    out.extend_from_slice(&0u16.to_le_bytes()); // context id
    out.push(0); // cancel count
    out.push(0);
    out.extend_from_slice(stub);
    out
}

fn fault(call_id: u32, status: u32) -> Vec<u8> {
    let mut out = header(PTYPE_FAULT, call_id, 32);
    out.extend_from_slice(&32u32.to_le_bytes()); // alloc hint
    out.extend_from_slice(&0u16.to_le_bytes());
    out.push(0);
    out.push(0);
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// NDR helper: a conformant varying UTF-16 string with its terminator,
/// padded to 4 bytes.
fn push_ndr_string(out: &mut Vec<u8>, value: &str) {
    let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
    out.extend_from_slice(&(units.len() as u32).to_le_bytes()); // max count
    out.extend_from_slice(&0u32.to_le_bytes()); // offset
    out.extend_from_slice(&(units.len() as u32).to_le_bytes()); // actual count
    for unit in &units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// The NetrShareEnum response stub: a level-1 SHARE_INFO container, total
/// entries, a null resume handle, and WERR_OK.
fn share_enum_stub(shares: &[RpcShare]) -> Vec<u8> {
    let mut ref_id = 0x0002_0000u32;
    let mut next_ref = || {
        ref_id += 4;
        ref_id
    };

    let count = shares.len() as u32;
    let mut out = Vec::new();
    out.extend_from_slice(&1u32.to_le_bytes()); // info level
    out.extend_from_slice(&1u32.to_le_bytes()); // union discriminant
    out.extend_from_slice(&next_ref().to_le_bytes()); // container pointer
    out.extend_from_slice(&count.to_le_bytes()); // entries read
    out.extend_from_slice(&next_ref().to_le_bytes()); // array pointer
    out.extend_from_slice(&count.to_le_bytes()); // conformant max count
    for share in shares {
        out.extend_from_slice(&next_ref().to_le_bytes()); // netname pointer
        let stype = if share.is_ipc { STYPE_IPC_HIDDEN } else { STYPE_DISKTREE };
        out.extend_from_slice(&stype.to_le_bytes());
        out.extend_from_slice(&next_ref().to_le_bytes()); // remark pointer
    }
    for share in shares {
        push_ndr_string(&mut out, &share.name);
        push_ndr_string(&mut out, &share.remark);
    }
    out.extend_from_slice(&count.to_le_bytes()); // total entries
    out.extend_from_slice(&next_ref().to_le_bytes()); // resume handle pointer
    out.extend_from_slice(&0u32.to_le_bytes()); // resume handle value
    out.extend_from_slice(&0u32.to_le_bytes()); // WERR_OK
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares() -> Vec<RpcShare> {
        vec![
            RpcShare { name: "data".into(), is_ipc: false, remark: String::new() },
            RpcShare { name: "IPC$".into(), is_ipc: true, remark: "IPC Service".into() },
        ]
    }

    #[test]
    fn bind_yields_bind_ack() {
        let mut bind = vec![5, 0, PTYPE_BIND, PFC_FIRST_LAST, 0x10, 0, 0, 0];
        bind.extend_from_slice(&72u16.to_le_bytes());
        bind.extend_from_slice(&0u16.to_le_bytes());
        bind.extend_from_slice(&3u32.to_le_bytes());
        let ack = handle_pdu(&bind, &shares()).unwrap();
        assert_eq!(ack[2], PTYPE_BIND_ACK);
        assert_eq!(LittleEndian::read_u32(&ack[12..16]), 3);
        assert_eq!(LittleEndian::read_u16(&ack[8..10]) as usize, ack.len());
    }

    #[test]
    fn share_enum_yields_werr_ok() {
        let mut req = vec![5, 0, PTYPE_REQUEST, PFC_FIRST_LAST, 0x10, 0, 0, 0];
        req.extend_from_slice(&24u16.to_le_bytes());
        req.extend_from_slice(&0u16.to_le_bytes());
        req.extend_from_slice(&7u32.to_le_bytes());
        req.extend_from_slice(&0u32.to_le_bytes()); // alloc hint
        req.extend_from_slice(&0u16.to_le_bytes()); // ctx id
        req.extend_from_slice(&OPNUM_NETR_SHARE_ENUM.to_le_bytes());
        let resp = handle_pdu(&req, &shares()).unwrap();
        assert_eq!(resp[2], PTYPE_RESPONSE);
        // Stub ends with WERR_OK.
        assert_eq!(&resp[resp.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn unknown_opnum_faults() {
        let mut req = vec![5, 0, PTYPE_REQUEST, PFC_FIRST_LAST, 0x10, 0, 0, 0];
        req.extend_from_slice(&24u16.to_le_bytes());
        req.extend_from_slice(&0u16.to_le_bytes());
        req.extend_from_slice(&7u32.to_le_bytes());
        req.extend_from_slice(&0u32.to_le_bytes());
        req.extend_from_slice(&0u16.to_le_bytes());
        req.extend_from_slice(&99u16.to_le_bytes());
        let resp = handle_pdu(&req, &shares()).unwrap();
        assert_eq!(resp[2], PTYPE_FAULT);
    }
}
