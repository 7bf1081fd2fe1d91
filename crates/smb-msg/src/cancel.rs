//! CANCEL request (MS-SMB2 2.2.30). The canceled operation is identified by
//! the header's MessageId; there is no CANCEL response.

use binrw::prelude::*;

#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct CancelRequest {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}
