//! ECHO request and response (MS-SMB2 2.2.28, 2.2.29).

use binrw::prelude::*;

#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct EchoRequest {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct EchoResponse {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}
