//! FILE_NOTIFY_INFORMATION records returned by CHANGE_NOTIFY (MS-FSCC 2.7.1).

use binrw::prelude::*;
use smb_dtyp::binrw_util::prelude::*;

use crate::ChainedItemList;

/// The change a notification reports.
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u32))]
pub enum NotifyAction {
    Added = 1,
    Removed = 2,
    Modified = 3,
    RenamedOldName = 4,
    RenamedNewName = 5,
    AddedStream = 6,
    RemovedStream = 7,
    ModifiedStream = 8,
}

/// One change record: the action and the affected name, relative to the
/// watched directory.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileNotifyInformation {
    pub action: NotifyAction,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

pub type FileNotifyInformationList = ChainedItemList<FileNotifyInformation, 4>;

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;

    test_binrw! {
        rename_pair: FileNotifyInformationList::from(vec![
            FileNotifyInformation {
                action: NotifyAction::RenamedOldName,
                file_name: "New folder".into(),
            },
            FileNotifyInformation {
                action: NotifyAction::RenamedNewName,
                file_name: "jdsa".into(),
            },
        ]) => "2000000004000000140000004e0065007700200066006f006c006400650072000000000005000000080000006a00640073006100"
    }
}
