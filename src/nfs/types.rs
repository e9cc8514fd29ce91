//! NFSv4.1 type definitions.
//!
//! These types follow the XDR definitions from RFC 5661 (NFSv4.1),
//! restricted to what the client puts on or reads off the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Session identifiers and device ids are 16 opaque bytes.
pub const NFS4_SESSIONID_SIZE: usize = 16;
pub const NFS4_DEVICEID4_SIZE: usize = 16;

/// All-ones length: "to the end of the file".
pub const NFS4_UINT64_MAX: u64 = u64::MAX;

/// NFS file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum NfsFtype4 {
    /// Regular file
    Reg = 1,
    /// Directory
    Dir = 2,
    /// Block device
    Blk = 3,
    /// Character device
    Chr = 4,
    /// Symbolic link
    Lnk = 5,
    /// Socket
    Sock = 6,
    /// FIFO
    Fifo = 7,
    /// Attribute directory
    AttrDir = 8,
    /// Named attribute
    NamedAttr = 9,
}

impl NfsFtype4 {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            1 => Some(Self::Reg),
            2 => Some(Self::Dir),
            3 => Some(Self::Blk),
            4 => Some(Self::Chr),
            5 => Some(Self::Lnk),
            6 => Some(Self::Sock),
            7 => Some(Self::Fifo),
            8 => Some(Self::AttrDir),
            9 => Some(Self::NamedAttr),
            _ => None,
        }
    }
}

/// NFS time value (seconds + nanoseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NfsTime4 {
    /// Seconds since epoch.
    pub seconds: i64,
    /// Nanoseconds.
    pub nseconds: u32,
}

impl NfsTime4 {
    pub fn new(seconds: i64, nseconds: u32) -> Self {
        Self { seconds, nseconds }
    }

    /// Get current time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(duration) => Self {
                seconds: duration.as_secs() as i64,
                nseconds: duration.subsec_nanos(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Convert to SystemTime; pre-epoch values clamp to the epoch.
    pub fn to_system_time(&self) -> SystemTime {
        if self.seconds >= 0 {
            SystemTime::UNIX_EPOCH + std::time::Duration::new(self.seconds as u64, self.nseconds)
        } else {
            SystemTime::UNIX_EPOCH
        }
    }
}

/// NFS file handle opaque data.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NfsFh4(pub Vec<u8>);

impl NfsFh4 {
    /// Maximum file handle size (128 bytes for NFSv4).
    pub const MAX_SIZE: usize = 128;

    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get the file handle data.
    pub fn data(&self) -> &[u8] {
        &self.0
    }

    /// Check if the file handle is valid.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= Self::MAX_SIZE
    }
}

impl fmt::Debug for NfsFh4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NfsFh4(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Eight-byte verifier (client owner, READDIR cookie, WRITE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Verifier4(pub [u8; 8]);

impl Verifier4 {
    pub fn new(data: [u8; 8]) -> Self {
        Self(data)
    }

    /// Generate a random verifier.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// Server-issued session identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SessionId4(pub [u8; NFS4_SESSIONID_SIZE]);

impl fmt::Debug for SessionId4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId4(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for SessionId4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// pNFS device identifier.
pub type DeviceId4 = [u8; NFS4_DEVICEID4_SIZE];

/// State ID for opens and layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Stateid4 {
    /// Sequence ID.
    pub seqid: u32,
    /// Other (opaque identifier).
    pub other: [u8; 12],
}

impl Stateid4 {
    pub fn new(seqid: u32, other: [u8; 12]) -> Self {
        Self { seqid, other }
    }

    /// Special state ID representing anonymous access.
    pub fn anonymous() -> Self {
        Self {
            seqid: 0,
            other: [0; 12],
        }
    }

    /// Special state ID that stands for the current stateid of the compound.
    pub fn current() -> Self {
        Self {
            seqid: 1,
            other: [0; 12],
        }
    }
}

/// Bitmap for attribute requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrBitmap(pub Vec<u32>);

impl AttrBitmap {
    /// Create an empty bitmap.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a bitmap from attribute numbers.
    pub fn from_bits(bits: &[u32]) -> Self {
        let mut bitmap = Self::new();
        for bit in bits {
            bitmap.set(*bit);
        }
        bitmap
    }

    /// Set a bit.
    pub fn set(&mut self, bit: u32) {
        let word = (bit / 32) as usize;
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << (bit % 32);
    }

    /// Check if a bit is set.
    pub fn is_set(&self, bit: u32) -> bool {
        self.0
            .get((bit / 32) as usize)
            .map_or(false, |word| word & (1 << (bit % 32)) != 0)
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().enumerate().flat_map(|(word, value)| {
            (0..32u32)
                .filter(move |bit| value & (1 << bit) != 0)
                .map(move |bit| word as u32 * 32 + bit)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }
}

/// Attribute numbers used by the client.
pub mod attr_bits {
    pub const SUPPORTED_ATTRS: u32 = 0;
    pub const TYPE: u32 = 1;
    pub const CHANGE: u32 = 3;
    pub const SIZE: u32 = 4;
    pub const LEASE_TIME: u32 = 10;
    pub const FILEID: u32 = 20;
    pub const FS_LOCATIONS: u32 = 24;
    pub const MODE: u32 = 33;
    pub const NUMLINKS: u32 = 35;
    pub const OWNER: u32 = 36;
    pub const OWNER_GROUP: u32 = 37;
    pub const SPACE_USED: u32 = 45;
    pub const TIME_ACCESS: u32 = 47;
    pub const TIME_CREATE: u32 = 50;
    pub const TIME_METADATA: u32 = 52;
    pub const TIME_MODIFY: u32 = 53;
    pub const FS_LAYOUT_TYPES: u32 = 62;
}

/// File attributes: bitmap plus the packed values it selects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr4 {
    pub attrmask: AttrBitmap,
    pub attr_vals: Vec<u8>,
}

/// Directory change information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeInfo4 {
    pub atomic: bool,
    pub before: u64,
    pub after: u64,
}

/// OPEN share access bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareAccess4(pub u32);

impl ShareAccess4 {
    pub const READ: u32 = 0x00000001;
    pub const WRITE: u32 = 0x00000002;
    pub const BOTH: u32 = 0x00000003;
}

/// OPEN share deny bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareDeny4(pub u32);

impl ShareDeny4 {
    pub const NONE: u32 = 0x00000000;
    pub const BOTH: u32 = 0x00000003;
}

/// How OPEN creates a missing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateHow4 {
    Unchecked(Attr4),
    Guarded(Attr4),
}

/// OPEN without or with creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFlag4 {
    NoCreate,
    Create(CreateHow4),
}

/// Name resolution for OPEN; only CLAIM_NULL is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenClaim4 {
    Null(String),
}

/// Owner of an open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOwner4 {
    pub clientid: u64,
    pub owner: Vec<u8>,
}

/// Access control entry carried by delegations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Nfsace4 {
    pub ace_type: u32,
    pub flag: u32,
    pub access_mask: u32,
    pub who: String,
}

/// Write delegation space limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceLimit4 {
    Size(u64),
    Blocks { num_blocks: u32, bytes_per_block: u32 },
}

/// Delegation returned by OPEN. Decoded so the reply parses; never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenDelegation4 {
    None,
    Read {
        stateid: Stateid4,
        recall: bool,
        permissions: Nfsace4,
    },
    Write {
        stateid: Stateid4,
        recall: bool,
        space_limit: SpaceLimit4,
        permissions: Nfsace4,
    },
    NoneExt {
        why: u32,
        will_signal: Option<bool>,
    },
}

/// Object type for CREATE; only directories are created this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateType4 {
    Directory,
}

/// WRITE stability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum StableHow4 {
    Unstable = 0,
    DataSync = 1,
    FileSync = 2,
}

impl StableHow4 {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(Self::Unstable),
            1 => Some(Self::DataSync),
            2 => Some(Self::FileSync),
            _ => None,
        }
    }
}

/// pNFS layout types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Layouttype4 {
    NfsV41Files = 1,
    Osd2Objects = 2,
    BlockVolume = 3,
    FlexFiles = 4,
}

impl Layouttype4 {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            1 => Some(Self::NfsV41Files),
            2 => Some(Self::Osd2Objects),
            3 => Some(Self::BlockVolume),
            4 => Some(Self::FlexFiles),
            _ => None,
        }
    }
}

/// pNFS layout I/O modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Layoutiomode4 {
    Read = 1,
    Rw = 2,
    Any = 3,
}

impl Layoutiomode4 {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            1 => Some(Self::Read),
            2 => Some(Self::Rw),
            3 => Some(Self::Any),
            _ => None,
        }
    }
}

/// One layout segment as returned by LAYOUTGET; the body is type specific.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout4 {
    pub offset: u64,
    pub length: u64,
    pub iomode: Layoutiomode4,
    pub layout_type: u32,
    pub body: Vec<u8>,
}

/// What LAYOUTRETURN gives back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutReturn4 {
    File {
        offset: u64,
        length: u64,
        stateid: Stateid4,
        body: Vec<u8>,
    },
    Fsid,
    All,
}

/// Type-specific LAYOUTCOMMIT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutUpdate4 {
    pub layout_type: u32,
    pub body: Vec<u8>,
}

/// Device address as returned by GETDEVICEINFO; the body is type specific.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddr4 {
    pub layout_type: u32,
    pub body: Vec<u8>,
}

/// Transport address in universal form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddr4 {
    pub netid: String,
    pub uaddr: String,
}

/// One server hosting a file system replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLocation4 {
    pub server: Vec<String>,
    pub rootpath: Vec<String>,
}

/// FS_LOCATIONS attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLocations4 {
    pub fs_root: Vec<String>,
    pub locations: Vec<FsLocation4>,
}
