//! Authentication: SPNEGO negotiation, NTLMv2 challenge/response, and
//! Kerberos AP-REQ validation.

pub mod asn1;
pub mod kerberos;
pub mod keytab;
pub mod ntlm;
pub mod spnego;
