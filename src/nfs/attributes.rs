//! Standard attribute codec.
//!
//! Servers return attributes as a bitmap plus one packed blob. The blob
//! holds the selected attributes back to back in ascending attribute
//! number order, so decoding is positional and driven by the bitmap.
//! [`StandardAttributes`] covers the fixed subset the client asks for;
//! a handful of single-attribute readers cover the rest.

use super::codec::{decode_bitmap, decode_nfstime, encode_nfstime};
use super::protocol::XdrCodec;
use super::types::{attr_bits, Attr4, AttrBitmap, FsLocation4, FsLocations4, NfsFtype4, NfsTime4};
use crate::error::{Nfs4Error, Result};
use serde::{Deserialize, Serialize};

/// Bits of the standard subset in canonical order.
pub const STANDARD_ATTRIBUTES: [u32; 12] = [
    attr_bits::TYPE,
    attr_bits::SIZE,
    attr_bits::FILEID,
    attr_bits::MODE,
    attr_bits::NUMLINKS,
    attr_bits::OWNER,
    attr_bits::OWNER_GROUP,
    attr_bits::SPACE_USED,
    attr_bits::TIME_ACCESS,
    attr_bits::TIME_CREATE,
    attr_bits::TIME_METADATA,
    attr_bits::TIME_MODIFY,
];

/// Bitmap requesting every standard attribute.
pub fn standard_bitmap() -> AttrBitmap {
    AttrBitmap::from_bits(&STANDARD_ATTRIBUTES)
}

/// Decoded snapshot of the standard attributes.
///
/// Fields whose bit was not in the bitmap keep their default value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardAttributes {
    pub file_type: Option<NfsFtype4>,
    pub size: u64,
    pub fileid: u64,
    pub mode: u32,
    pub numlinks: u32,
    pub owner: String,
    pub group: String,
    pub space_used: u64,
    pub time_access: NfsTime4,
    pub time_create: NfsTime4,
    pub time_metadata: NfsTime4,
    pub time_modify: NfsTime4,
}

impl StandardAttributes {
    /// Decode `blob` according to `bitmap`.
    pub fn decode(bitmap: &AttrBitmap, blob: &[u8]) -> Result<Self> {
        let mut attrs = Self::default();
        let mut xdr = XdrCodec::from_bytes(blob.to_vec());

        for bit in bitmap.iter() {
            let short = |e: Nfs4Error| {
                Nfs4Error::MalformedAttribute(format!("attribute {}: {}", bit, e))
            };
            match bit {
                attr_bits::TYPE => {
                    let raw = xdr.decode_u32().map_err(short)?;
                    attrs.file_type = Some(NfsFtype4::from_u32(raw).ok_or_else(|| {
                        Nfs4Error::MalformedAttribute(format!("unknown file type {}", raw))
                    })?);
                }
                attr_bits::SIZE => attrs.size = xdr.decode_u64().map_err(short)?,
                attr_bits::FILEID => attrs.fileid = xdr.decode_u64().map_err(short)?,
                attr_bits::MODE => attrs.mode = xdr.decode_u32().map_err(short)?,
                attr_bits::NUMLINKS => attrs.numlinks = xdr.decode_u32().map_err(short)?,
                attr_bits::OWNER => attrs.owner = xdr.decode_string().map_err(short)?,
                attr_bits::OWNER_GROUP => attrs.group = xdr.decode_string().map_err(short)?,
                attr_bits::SPACE_USED => attrs.space_used = xdr.decode_u64().map_err(short)?,
                attr_bits::TIME_ACCESS => attrs.time_access = decode_nfstime(&mut xdr).map_err(short)?,
                attr_bits::TIME_CREATE => attrs.time_create = decode_nfstime(&mut xdr).map_err(short)?,
                attr_bits::TIME_METADATA => {
                    attrs.time_metadata = decode_nfstime(&mut xdr).map_err(short)?
                }
                attr_bits::TIME_MODIFY => attrs.time_modify = decode_nfstime(&mut xdr).map_err(short)?,
                other => {
                    return Err(Nfs4Error::MalformedAttribute(format!(
                        "attribute {} is outside the standard set",
                        other
                    )))
                }
            }
        }

        Ok(attrs)
    }

    /// Decode a `fattr4` returned by GETATTR or READDIR.
    pub fn from_attr4(attrs: &Attr4) -> Result<Self> {
        Self::decode(&attrs.attrmask, &attrs.attr_vals)
    }

    /// Pack the fields selected by `bitmap`.
    pub fn encode(&self, bitmap: &AttrBitmap) -> Result<Vec<u8>> {
        let mut xdr = XdrCodec::new();
        for bit in bitmap.iter() {
            match bit {
                attr_bits::TYPE => {
                    let file_type = self.file_type.ok_or_else(|| {
                        Nfs4Error::MalformedAttribute("type selected but unset".into())
                    })?;
                    xdr.encode_u32(file_type as u32);
                }
                attr_bits::SIZE => xdr.encode_u64(self.size),
                attr_bits::FILEID => xdr.encode_u64(self.fileid),
                attr_bits::MODE => xdr.encode_u32(self.mode),
                attr_bits::NUMLINKS => xdr.encode_u32(self.numlinks),
                attr_bits::OWNER => xdr.encode_string(&self.owner),
                attr_bits::OWNER_GROUP => xdr.encode_string(&self.group),
                attr_bits::SPACE_USED => xdr.encode_u64(self.space_used),
                attr_bits::TIME_ACCESS => encode_nfstime(&mut xdr, &self.time_access),
                attr_bits::TIME_CREATE => encode_nfstime(&mut xdr, &self.time_create),
                attr_bits::TIME_METADATA => encode_nfstime(&mut xdr, &self.time_metadata),
                attr_bits::TIME_MODIFY => encode_nfstime(&mut xdr, &self.time_modify),
                other => {
                    return Err(Nfs4Error::MalformedAttribute(format!(
                        "attribute {} is outside the standard set",
                        other
                    )))
                }
            }
        }
        Ok(xdr.into_bytes())
    }

    /// Pack into a `fattr4` selecting `bitmap`.
    pub fn to_attr4(&self, bitmap: &AttrBitmap) -> Result<Attr4> {
        Ok(Attr4 {
            attrmask: bitmap.clone(),
            attr_vals: self.encode(bitmap)?,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == Some(NfsFtype4::Dir)
    }
}

/// `fattr4` carrying only a mode, as used for CREATE and OPEN(CREATE).
pub fn mode_attr(mode: u32) -> Attr4 {
    let mut xdr = XdrCodec::new();
    xdr.encode_u32(mode);
    Attr4 {
        attrmask: AttrBitmap::from_bits(&[attr_bits::MODE]),
        attr_vals: xdr.into_bytes(),
    }
}

fn single(attrs: &Attr4, bit: u32) -> Result<XdrCodec> {
    let bits: Vec<u32> = attrs.attrmask.iter().collect();
    if bits != [bit] {
        return Err(Nfs4Error::MalformedAttribute(format!(
            "expected only attribute {}, got {:?}",
            bit, bits
        )));
    }
    Ok(XdrCodec::from_bytes(attrs.attr_vals.clone()))
}

fn malformed(bit: u32) -> impl Fn(Nfs4Error) -> Nfs4Error {
    move |e| Nfs4Error::MalformedAttribute(format!("attribute {}: {}", bit, e))
}

/// LEASE_TIME in seconds.
pub fn decode_lease_time(attrs: &Attr4) -> Result<u32> {
    single(attrs, attr_bits::LEASE_TIME)?
        .decode_u32()
        .map_err(malformed(attr_bits::LEASE_TIME))
}

/// SUPPORTED_ATTRS bitmap.
pub fn decode_supported_attrs(attrs: &Attr4) -> Result<AttrBitmap> {
    let mut xdr = single(attrs, attr_bits::SUPPORTED_ATTRS)?;
    decode_bitmap(&mut xdr).map_err(malformed(attr_bits::SUPPORTED_ATTRS))
}

/// FS_LAYOUT_TYPES as raw layout type numbers.
pub fn decode_fs_layout_types(attrs: &Attr4) -> Result<Vec<u32>> {
    single(attrs, attr_bits::FS_LAYOUT_TYPES)?
        .decode_u32_array()
        .map_err(malformed(attr_bits::FS_LAYOUT_TYPES))
}

fn decode_pathname(xdr: &mut XdrCodec) -> Result<Vec<String>> {
    let count = xdr.decode_count(4)?;
    (0..count).map(|_| xdr.decode_string()).collect()
}

/// FS_LOCATIONS referral data.
pub fn decode_fs_locations(attrs: &Attr4) -> Result<FsLocations4> {
    let mut xdr = single(attrs, attr_bits::FS_LOCATIONS)?;
    let parse = |xdr: &mut XdrCodec| -> Result<FsLocations4> {
        let fs_root = decode_pathname(xdr)?;
        let count = xdr.decode_count(8)?;
        let mut locations = Vec::with_capacity(count);
        for _ in 0..count {
            let servers = xdr.decode_count(4)?;
            let server = (0..servers)
                .map(|_| xdr.decode_string())
                .collect::<Result<Vec<_>>>()?;
            let rootpath = decode_pathname(xdr)?;
            locations.push(FsLocation4 { server, rootpath });
        }
        Ok(FsLocations4 { fs_root, locations })
    };
    parse(&mut xdr).map_err(malformed(attr_bits::FS_LOCATIONS))
}

/// Server-direction helpers for the single-attribute readers.
pub mod encode {
    use super::*;

    fn single(bit: u32, xdr: XdrCodec) -> Attr4 {
        Attr4 {
            attrmask: AttrBitmap::from_bits(&[bit]),
            attr_vals: xdr.into_bytes(),
        }
    }

    pub fn lease_time(seconds: u32) -> Attr4 {
        let mut xdr = XdrCodec::new();
        xdr.encode_u32(seconds);
        single(attr_bits::LEASE_TIME, xdr)
    }

    pub fn supported_attrs(bitmap: &AttrBitmap) -> Attr4 {
        let mut xdr = XdrCodec::new();
        xdr.encode_u32_array(&bitmap.0);
        single(attr_bits::SUPPORTED_ATTRS, xdr)
    }

    pub fn fs_layout_types(types: &[u32]) -> Attr4 {
        let mut xdr = XdrCodec::new();
        xdr.encode_u32_array(types);
        single(attr_bits::FS_LAYOUT_TYPES, xdr)
    }

    pub fn fs_locations(locations: &FsLocations4) -> Attr4 {
        let mut xdr = XdrCodec::new();
        let pathname = |xdr: &mut XdrCodec, path: &[String]| {
            xdr.encode_u32(path.len() as u32);
            for component in path {
                xdr.encode_string(component);
            }
        };
        pathname(&mut xdr, &locations.fs_root);
        xdr.encode_u32(locations.locations.len() as u32);
        for location in &locations.locations {
            pathname(&mut xdr, &location.server);
            pathname(&mut xdr, &location.rootpath);
        }
        single(attr_bits::FS_LOCATIONS, xdr)
    }
}
