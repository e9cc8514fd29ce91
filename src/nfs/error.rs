//! NFSv4.1 status codes.
//!
//! Numbering follows RFC 5661 section 15.1. Only the transient states
//! (`Delay`, `Grace`, `LayoutTryLater`) are retryable; every other
//! non-`Ok` status is terminal for the compound that produced it.

use std::fmt;

macro_rules! nfs_status {
    ($( $(#[$doc:meta])* $name:ident = $code:literal, )+) => {
        /// Status code carried by a COMPOUND reply and by each operation result.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum NfsStatus {
            $( $(#[$doc])* $name = $code, )+
        }

        impl NfsStatus {
            /// Map a wire value to a known status.
            pub fn from_u32(val: u32) -> Option<Self> {
                match val {
                    $( $code => Some(Self::$name), )+
                    _ => None,
                }
            }
        }
    };
}

nfs_status! {
    /// Operation succeeded
    Ok = 0,
    /// Caller is not privileged
    Perm = 1,
    /// No such file or directory
    Noent = 2,
    /// Hard I/O error
    Io = 5,
    /// No such device or address
    Nxio = 6,
    /// Access denied
    Access = 13,
    /// File exists
    Exist = 17,
    /// Cross-device link
    Xdev = 18,
    /// Not a directory
    Notdir = 20,
    /// Is a directory
    Isdir = 21,
    /// Invalid argument
    Inval = 22,
    /// File too large
    Fbig = 27,
    /// No space left on device
    Nospc = 28,
    /// Read-only file system
    Rofs = 30,
    /// Too many hard links
    Mlink = 31,
    /// Name too long
    Nametoolong = 63,
    /// Directory not empty
    Notempty = 66,
    /// Quota exceeded
    Dquot = 69,
    /// Stale file handle
    Stale = 70,
    /// Illegal file handle
    Badhandle = 10001,
    /// READDIR cookie is stale
    BadCookie = 10003,
    /// Operation not supported
    Notsupp = 10004,
    /// Response limit exceeded
    Toosmall = 10005,
    /// Undefined server error
    Serverfault = 10006,
    /// Object type not supported
    Badtype = 10007,
    /// Server busy, retry later
    Delay = 10008,
    /// Attributes are the same
    Same = 10009,
    /// Lock unavailable
    Denied = 10010,
    /// Lock lease expired
    Expired = 10011,
    /// I/O failed due to lock
    Locked = 10012,
    /// Server in grace period
    Grace = 10013,
    /// File handle expired
    FhExpired = 10014,
    /// Share reservation denied
    ShareDenied = 10015,
    /// Wrong security flavor
    WrongSec = 10016,
    /// Client id in use
    ClidInuse = 10017,
    /// Resource exhaustion
    Resource = 10018,
    /// File system relocated
    Moved = 10019,
    /// Current file handle not set
    Nofilehandle = 10020,
    /// Minor version not supported
    MinorVersMismatch = 10021,
    /// Server has rebooted
    StaleClientid = 10022,
    /// Server has rebooted
    StaleStateid = 10023,
    /// State is out of sync
    OldStateid = 10024,
    /// Incorrect stateid
    BadStateid = 10025,
    /// Request is out of sequence
    BadSeqid = 10026,
    /// Verify - attributes not same
    NotSame = 10027,
    /// Lock range not supported
    LockRange = 10028,
    /// Should be a file or directory
    Symlink = 10029,
    /// No saved file handle
    Restorefh = 10030,
    /// Some file system moved
    LeaseMoved = 10031,
    /// Recommended attribute not supported
    Attrnotsupp = 10032,
    /// Reclaim outside of grace
    NoGrace = 10033,
    /// Reclaim error at server
    ReclaimBad = 10034,
    /// Conflict on reclaim
    ReclaimConflict = 10035,
    /// XDR decode failed
    BadXdr = 10036,
    /// File locks held at CLOSE
    LocksHeld = 10037,
    /// Conflict in OPEN and I/O
    Openmode = 10038,
    /// Owner translation bad
    Badowner = 10039,
    /// UTF-8 character not supported
    Badchar = 10040,
    /// Name not supported
    Badname = 10041,
    /// Lock range not supported
    BadRange = 10042,
    /// No atomic up/downgrade
    LockNotsupp = 10043,
    /// Undefined operation
    OpIllegal = 10044,
    /// File locking deadlock
    Deadlock = 10045,
    /// Open file blocks operation
    FileOpen = 10046,
    /// Lock-owner state revoked
    AdminRevoked = 10047,
    /// Callback path down
    CbPathDown = 10048,
    /// Bad layout iomode
    BadIomode = 10049,
    /// Bad layout
    BadLayout = 10050,
    /// Bad session digest
    BadSessionDigest = 10051,
    /// Bad session id
    BadSession = 10052,
    /// Bad slot id
    BadSlot = 10053,
    /// RECLAIM_COMPLETE already done
    CompleteAlready = 10054,
    /// Connection not bound to session
    ConnNotBoundToSession = 10055,
    /// Delegation already wanted
    DelegAlreadyWanted = 10056,
    /// Back channel busy
    BackChanBusy = 10057,
    /// Layout not available yet
    LayoutTryLater = 10058,
    /// Layout not available
    LayoutUnavailable = 10059,
    /// No matching layout
    NoMatchingLayout = 10060,
    /// Recall conflict
    RecallConflict = 10061,
    /// Unknown layout type
    UnknownLayoutType = 10062,
    /// Slot sequence out of order
    SeqMisordered = 10063,
    /// SEQUENCE not first operation
    SequencePos = 10064,
    /// Request too big
    ReqTooBig = 10065,
    /// Reply too big
    RepTooBig = 10066,
    /// Reply too big to cache
    RepTooBigToCache = 10067,
    /// Retry of an uncached reply
    RetryUncachedRep = 10068,
    /// Unsafe compound
    UnsafeCompound = 10069,
    /// Too many operations
    TooManyOps = 10070,
    /// Operation not in session
    OpNotInSession = 10071,
    /// Hash algorithm unsupported
    HashAlgUnsupp = 10072,
    /// Client id busy
    ClientidBusy = 10074,
    /// I/O into a pNFS hole
    PnfsIoHole = 10075,
    /// Retry with different request
    SeqFalseRetry = 10076,
    /// Bad highest slot id
    BadHighSlot = 10077,
    /// Session is dead
    DeadSession = 10078,
    /// Encryption algorithm unsupported
    EncrAlgUnsupp = 10079,
    /// No layout for I/O
    PnfsNoLayout = 10080,
    /// Must be the only operation
    NotOnlyOp = 10081,
    /// Wrong credential
    WrongCred = 10082,
    /// Wrong object type
    WrongType = 10083,
    /// Directory delegation unavailable
    DirdelegUnavail = 10084,
    /// Delegation rejected
    RejectDeleg = 10085,
    /// Layout return conflict
    ReturnConflict = 10086,
    /// Delegation revoked
    DelegRevoked = 10087,
}

impl NfsStatus {
    /// Wire value of this status.
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Check if this is a success status.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Transient server states that clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Delay | Self::Grace | Self::LayoutTryLater)
    }
}

impl fmt::Display for NfsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.to_u32())
    }
}
