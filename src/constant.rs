/// Every request frame starts with this byte, followed by the command byte.
pub const PROTOCOL_MAGIC: u8 = 0xC8;

/// Tyrant listens on 1978 unless configured otherwise.
pub const DEFAULT_PORT: u16 = 1978;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandByte {
    Put = 0x10,
    PutKeep = 0x11,
    PutCat = 0x12,
    PutShl = 0x13,
    PutNr = 0x18,
    Out = 0x20,
    Get = 0x30,
    Mget = 0x31,
    Vsiz = 0x38,
    IterInit = 0x50,
    IterNext = 0x51,
    FwmKeys = 0x58,
    AddInt = 0x60,
    AddDouble = 0x61,
    Ext = 0x68,
    Sync = 0x70,
    Vanish = 0x72,
    Copy = 0x73,
    Restore = 0x74,
    SetMst = 0x78,
    Rnum = 0x80,
    Size = 0x81,
    Stat = 0x88,
    Misc = 0x90,
}

/// Query condition operators for table databases.
///
/// `Negate` and `NoIndex` are flag bits the server ORs into the operator
/// word; they are listed so callers can build raw conditions.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    /// string is equal to
    StrEq = 0,
    /// string is included in
    StrInc = 1,
    /// string begins with
    StrBw = 2,
    /// string ends with
    StrEw = 3,
    /// string includes all tokens in
    StrAnd = 4,
    /// string includes at least one token in
    StrOr = 5,
    /// string is equal to at least one token in
    StrOrEq = 6,
    /// string matches the regular expression of
    StrRx = 7,
    /// number is equal to
    NumEq = 8,
    /// number is greater than
    NumGt = 9,
    /// number is greater than or equal to
    NumGe = 10,
    /// number is less than
    NumLt = 11,
    /// number is less than or equal to
    NumLe = 12,
    /// number is between two tokens of
    NumBt = 13,
    /// number is equal to at least one token in
    NumOrEq = 14,
    /// negation flag
    Negate = 15,
    /// no index flag
    NoIndex = 16,
}

/// Result ordering for table searches.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDir {
    #[default]
    StrAsc = 0,
    StrDesc = 1,
    NumAsc = 2,
    NumDesc = 3,
}

bitflags::bitflags! {
    /// Option word of the MISC command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MiscFlags: u32 {
        /// Omit the operation from the update log.
        const NO_UPDATE_LOG = 1;
    }
}

bitflags::bitflags! {
    /// Option word of the EXT command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtFlags: u32 {
        /// Lock the record while the script function runs.
        const LOCK_RECORD = 1;
        /// Lock the whole database while the script function runs.
        const LOCK_GLOBAL = 2;
    }
}
