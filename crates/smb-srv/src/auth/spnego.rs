//! SPNEGO (RFC 4178) negotiation tokens around the NTLM and Kerberos
//! mechanisms.

use super::asn1::{DerError, DerReader, DerResult, der_tlv};

/// Encoded mechanism OIDs, including the 0x06 tag.
pub const OID_SPNEGO: &[u8] = &[0x06, 0x06, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
pub const OID_NTLMSSP: &[u8] =
    &[0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];
pub const OID_KRB5: &[u8] =
    &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
pub const OID_MS_KRB5: &[u8] =
    &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x82, 0xf7, 0x12, 0x01, 0x02, 0x02];

const NEG_STATE_ACCEPT_COMPLETED: u8 = 0;
const NEG_STATE_ACCEPT_INCOMPLETE: u8 = 1;

/// A parsed NegTokenInit.
#[derive(Debug, Default)]
pub struct NegTokenInit {
    /// Offered mechanisms, raw OID encodings in preference order.
    pub mech_types: Vec<Vec<u8>>,
    /// The optimistic mechanism token, if any.
    pub mech_token: Option<Vec<u8>>,
}

impl NegTokenInit {
    pub fn offers_ntlm(&self) -> bool {
        self.mech_types.iter().any(|oid| oid == OID_NTLMSSP)
    }

    pub fn offers_kerberos(&self) -> bool {
        self.mech_types.iter().any(|oid| oid == OID_KRB5 || oid == OID_MS_KRB5)
    }
}

/// Parses a GSS-API initial context token (0x60 wrapping the SPNEGO OID and
/// a NegTokenInit).
pub fn parse_initial_token(data: &[u8]) -> DerResult<NegTokenInit> {
    let mut outer = DerReader::new(data);
    let content = outer.expect(0x60)?;
    let mut reader = DerReader::new(content);
    let (oid_tag, oid) = reader.read_tlv()?;
    if oid_tag != 0x06 || der_tlv(0x06, oid) != OID_SPNEGO {
        return Err(DerError(0));
    }
    let init = reader.expect(0xa0)?;
    parse_neg_token_init(init)
}

fn parse_neg_token_init(data: &[u8]) -> DerResult<NegTokenInit> {
    let mut reader = DerReader::new(data);
    let seq = reader.expect(0x30)?;
    let mut fields = DerReader::new(seq);
    let mut out = NegTokenInit::default();
    while !fields.is_empty() {
        let (tag, content) = fields.read_tlv()?;
        match tag {
            0xa0 => {
                let mut inner = DerReader::new(content);
                let list = inner.expect(0x30)?;
                let mut oids = DerReader::new(list);
                while !oids.is_empty() {
                    let (oid_tag, oid) = oids.read_tlv()?;
                    if oid_tag == 0x06 {
                        out.mech_types.push(der_tlv(0x06, oid));
                    }
                }
            }
            0xa2 => {
                let mut inner = DerReader::new(content);
                out.mech_token = Some(inner.expect(0x04)?.to_vec());
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Parses a NegTokenResp (0xa1) and returns the response token; this is how
/// the NTLM AUTHENTICATE message arrives on the second leg.
pub fn parse_token_resp(data: &[u8]) -> DerResult<Vec<u8>> {
    let mut outer = DerReader::new(data);
    let content = outer.expect(0xa1)?;
    let mut reader = DerReader::new(content);
    let seq = reader.expect(0x30)?;
    let mut fields = DerReader::new(seq);
    while !fields.is_empty() {
        let (tag, content) = fields.read_tlv()?;
        if tag == 0xa2 {
            let mut inner = DerReader::new(content);
            return Ok(inner.expect(0x04)?.to_vec());
        }
    }
    Err(DerError(data.len()))
}

fn build_neg_token_resp(
    state: u8,
    mech: Option<&[u8]>,
    response_token: Option<&[u8]>,
) -> Vec<u8> {
    let mut seq = Vec::new();
    seq.extend_from_slice(&der_tlv(0xa0, &der_tlv(0x0a, &[state])));
    if let Some(mech) = mech {
        seq.extend_from_slice(&der_tlv(0xa1, mech));
    }
    if let Some(token) = response_token {
        seq.extend_from_slice(&der_tlv(0xa2, &der_tlv(0x04, token)));
    }
    der_tlv(0xa1, &der_tlv(0x30, &seq))
}

/// Wraps an NTLM CHALLENGE in accept-incomplete.
pub fn wrap_challenge(ntlm_challenge: &[u8]) -> Vec<u8> {
    build_neg_token_resp(NEG_STATE_ACCEPT_INCOMPLETE, Some(OID_NTLMSSP), Some(ntlm_challenge))
}

/// The final accept-complete token.
pub fn accept_complete() -> Vec<u8> {
    build_neg_token_resp(NEG_STATE_ACCEPT_COMPLETED, None, None)
}

/// The NEGOTIATE-response hint: a NegTokenInit offering Kerberos and NTLM.
pub fn negotiate_hint(offer_kerberos: bool) -> Vec<u8> {
    let mut oids = Vec::new();
    if offer_kerberos {
        oids.extend_from_slice(OID_MS_KRB5);
        oids.extend_from_slice(OID_KRB5);
    }
    oids.extend_from_slice(OID_NTLMSSP);
    let mech_types = der_tlv(0xa0, &der_tlv(0x30, &oids));
    let init = der_tlv(0xa0, &der_tlv(0x30, &mech_types));
    let mut body = OID_SPNEGO.to_vec();
    body.extend_from_slice(&init);
    der_tlv(0x60, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_initial(mechs: &[&[u8]], token: Option<&[u8]>) -> Vec<u8> {
        let mut oids = Vec::new();
        for mech in mechs {
            oids.extend_from_slice(mech);
        }
        let mut seq = der_tlv(0xa0, &der_tlv(0x30, &oids));
        if let Some(token) = token {
            seq.extend_from_slice(&der_tlv(0xa2, &der_tlv(0x04, token)));
        }
        let init = der_tlv(0xa0, &der_tlv(0x30, &seq));
        let mut body = OID_SPNEGO.to_vec();
        body.extend_from_slice(&init);
        der_tlv(0x60, &body)
    }

    #[test]
    fn initial_token_round_trip() {
        let token = build_initial(&[OID_NTLMSSP, OID_KRB5], Some(b"NTLMSSP\0rest"));
        let parsed = parse_initial_token(&token).unwrap();
        assert!(parsed.offers_ntlm());
        assert!(parsed.offers_kerberos());
        assert_eq!(parsed.mech_token.as_deref(), Some(&b"NTLMSSP\0rest"[..]));
    }

    #[test]
    fn challenge_wrap_and_unwrap() {
        let wrapped = wrap_challenge(b"challenge-bytes");
        // The response-token leg parses back out of a NegTokenResp.
        assert_eq!(parse_token_resp(&wrapped).unwrap(), b"challenge-bytes");
    }

    #[test]
    fn negotiate_hint_parses_as_initial_token() {
        let hint = negotiate_hint(true);
        let parsed = parse_initial_token(&hint).unwrap();
        assert!(parsed.offers_ntlm());
        assert!(parsed.offers_kerberos());
        assert!(parsed.mech_token.is_none());
    }
}
