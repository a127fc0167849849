//! Fixed-width signature records used as the duplicate-detection key.
//!
//! A signature summarizes the 5'-end position, orientation, and library of
//! either a lone fragment or a completed mate pair. Signatures are produced
//! once in Pass 1, spilled/merged through an [`crate::external_sort`]
//! instance, and consumed once in Pass 2. Optional fields (barcodes, the
//! representative read name) are always present in the binary layout - with
//! a sentinel/absent encoding when unused - so every signature in a run has
//! the same on-disk width regardless of configuration.

use std::io::{self, Read, Write};

/// Strand/orientation encoding shared by fragment and pair signatures.
///
/// `F`/`R` apply to lone fragments; the four paired combinations encode
/// `(strand_of_read1 << 1) | strand_of_read2` offset from `FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Orientation {
    F = 0,
    R = 1,
    FF = 2,
    FR = 3,
    RF = 4,
    RR = 5,
}

impl Orientation {
    pub fn lone(reverse: bool) -> Self {
        if reverse { Orientation::R } else { Orientation::F }
    }

    /// Encode an ordered pair's strands, read1 first.
    pub fn paired(read1_reverse: bool, read2_reverse: bool) -> Self {
        let bits = ((read1_reverse as u8) << 1) | (read2_reverse as u8);
        match bits {
            0 => Orientation::FF,
            1 => Orientation::FR,
            2 => Orientation::RF,
            _ => Orientation::RR,
        }
    }

    pub fn from_u8(b: u8) -> Self {
        match b {
            0 => Orientation::F,
            1 => Orientation::R,
            2 => Orientation::FF,
            3 => Orientation::FR,
            4 => Orientation::RF,
            _ => Orientation::RR,
        }
    }
}

/// Maximum SAM query name length (the SAM spec's QNAME regex caps it at 254
/// characters); used to keep the representative-name slot fixed-width.
pub const MAX_READ_NAME_LEN: usize = 254;

/// A read name capped to [`MAX_READ_NAME_LEN`] bytes, stored inline so
/// signatures remain fixed-width. `len == 0` means "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedName {
    len: u8,
    bytes: [u8; MAX_READ_NAME_LEN],
}

impl FixedName {
    pub fn absent() -> Self {
        Self { len: 0, bytes: [0u8; MAX_READ_NAME_LEN] }
    }

    pub fn from_bytes(name: &[u8]) -> Self {
        let len = name.len().min(MAX_READ_NAME_LEN);
        let mut bytes = [0u8; MAX_READ_NAME_LEN];
        bytes[..len].copy_from_slice(&name[..len]);
        Self { len: len as u8, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn is_absent(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.len])?;
        w.write_all(&self.bytes)
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut len = [0u8; 1];
        r.read_exact(&mut len)?;
        let mut bytes = [0u8; MAX_READ_NAME_LEN];
        r.read_exact(&mut bytes)?;
        Ok(Self { len: len[0], bytes })
    }
}

impl PartialOrd for FixedName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FixedName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

fn write_opt_u64<W: Write>(w: &mut W, v: Option<u64>) -> io::Result<()> {
    match v {
        Some(x) => {
            w.write_all(&[1u8])?;
            w.write_all(&x.to_le_bytes())
        }
        None => w.write_all(&[0u8; 9]),
    }
}

fn read_opt_u64<R: Read>(r: &mut R) -> io::Result<Option<u64>> {
    let mut flag = [0u8; 1];
    r.read_exact(&mut flag)?;
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(if flag[0] == 1 { Some(u64::from_le_bytes(buf)) } else { None })
}

/// Optical-location fields, sentinel (-1) when unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpticalLocation {
    pub read_group_ordinal: i32,
    pub tile: i32,
    pub x: i32,
    pub y: i32,
}

impl OpticalLocation {
    pub fn sentinel() -> Self {
        Self { read_group_ordinal: -1, tile: -1, x: -1, y: -1 }
    }

    pub fn is_present(&self) -> bool {
        self.tile >= 0 && self.x >= 0 && self.y >= 0
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.read_group_ordinal.to_le_bytes())?;
        w.write_all(&self.tile.to_le_bytes())?;
        w.write_all(&self.x.to_le_bytes())?;
        w.write_all(&self.y.to_le_bytes())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        let read_group_ordinal = i32::from_le_bytes(buf);
        r.read_exact(&mut buf)?;
        let tile = i32::from_le_bytes(buf);
        r.read_exact(&mut buf)?;
        let x = i32::from_le_bytes(buf);
        r.read_exact(&mut buf)?;
        let y = i32::from_le_bytes(buf);
        Ok(Self { read_group_ordinal, tile, x, y })
    }
}

/// Optional barcode triple (molecular barcode, read-one, read-two), each an
/// integer hash of the tag's string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct BarcodeTriple {
    pub barcode: Option<u64>,
    pub read_one_barcode: Option<u64>,
    pub read_two_barcode: Option<u64>,
}

impl BarcodeTriple {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_opt_u64(w, self.barcode)?;
        write_opt_u64(w, self.read_one_barcode)?;
        write_opt_u64(w, self.read_two_barcode)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            barcode: read_opt_u64(r)?,
            read_one_barcode: read_opt_u64(r)?,
            read_two_barcode: read_opt_u64(r)?,
        })
    }
}

/// Signature for a completed mate pair.
///
/// Field order matches the pair-sweep comparator in §4.4 of the spec:
/// library -> barcode triple -> (read1_ref_id, read1_coord, orientation) ->
/// (read2_ref_id, read2_coord); remaining fields only affect total order,
/// never grouping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PairSignature {
    pub library_id: i32,
    pub barcodes: BarcodeTriple,
    pub read1_ref_id: i32,
    pub read1_coord: i32,
    pub orientation: Orientation,
    pub read2_ref_id: i32,
    pub read2_coord: i32,
    pub score: u32,
    pub read1_index: u64,
    pub read2_index: u64,
    pub optical: OpticalLocation,
    pub orientation_for_optical: Orientation,
    pub representative_name: FixedName,
}

impl PairSignature {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.library_id.to_le_bytes())?;
        self.barcodes.write_to(w)?;
        w.write_all(&self.read1_ref_id.to_le_bytes())?;
        w.write_all(&self.read1_coord.to_le_bytes())?;
        w.write_all(&[self.orientation as u8, self.orientation_for_optical as u8])?;
        w.write_all(&self.read2_ref_id.to_le_bytes())?;
        w.write_all(&self.read2_coord.to_le_bytes())?;
        w.write_all(&self.score.to_le_bytes())?;
        w.write_all(&self.read1_index.to_le_bytes())?;
        w.write_all(&self.read2_index.to_le_bytes())?;
        self.optical.write_to(w)?;
        self.representative_name.write_to(w)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        let mut buf4 = [0u8; 4];
        if r.read_exact(&mut buf4).is_err() {
            return Ok(None);
        }
        let library_id = i32::from_le_bytes(buf4);
        let barcodes = BarcodeTriple::read_from(r)?;
        r.read_exact(&mut buf4)?;
        let read1_ref_id = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let read1_coord = i32::from_le_bytes(buf4);
        let mut buf2 = [0u8; 2];
        r.read_exact(&mut buf2)?;
        let orientation = Orientation::from_u8(buf2[0]);
        let orientation_for_optical = Orientation::from_u8(buf2[1]);
        r.read_exact(&mut buf4)?;
        let read2_ref_id = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let read2_coord = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let score = u32::from_le_bytes(buf4);
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let read1_index = u64::from_le_bytes(buf8);
        r.read_exact(&mut buf8)?;
        let read2_index = u64::from_le_bytes(buf8);
        let optical = OpticalLocation::read_from(r)?;
        let representative_name = FixedName::read_from(r)?;
        Ok(Some(Self {
            library_id,
            barcodes,
            read1_ref_id,
            read1_coord,
            orientation,
            read2_ref_id,
            read2_coord,
            score,
            read1_index,
            read2_index,
            optical,
            orientation_for_optical,
            representative_name,
        }))
    }

    /// Whether `self` and `other` belong to the same duplicate-candidate
    /// group under the pair-sweep comparator (spec §4.4, criteria 1-4).
    pub fn comparable(&self, other: &Self) -> bool {
        self.library_id == other.library_id
            && self.barcodes == other.barcodes
            && self.read1_ref_id == other.read1_ref_id
            && self.read1_coord == other.read1_coord
            && self.orientation == other.orientation
            && self.read2_ref_id == other.read2_ref_id
            && self.read2_coord == other.read2_coord
    }
}

/// Signature for a lone fragment (unpaired read, or a paired read whose
/// mate is unmapped / not yet encountered as a completed pair).
///
/// Field order matches the fragment-sweep comparator: library -> barcode
/// triple -> (read1_ref_id, read1_coord, orientation); `read2_ref_id` is
/// carried (sentinel -1) purely to distinguish a fragment that happens to
/// be the primary side of a mapped pair, per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FragmentSignature {
    pub library_id: i32,
    pub barcodes: BarcodeTriple,
    pub read1_ref_id: i32,
    pub read1_coord: i32,
    pub orientation: Orientation,
    pub read2_ref_id: i32,
    pub score: u32,
    pub read1_index: u64,
    pub optical: OpticalLocation,
    pub representative_name: FixedName,
}

impl FragmentSignature {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.library_id.to_le_bytes())?;
        self.barcodes.write_to(w)?;
        w.write_all(&self.read1_ref_id.to_le_bytes())?;
        w.write_all(&self.read1_coord.to_le_bytes())?;
        w.write_all(&[self.orientation as u8])?;
        w.write_all(&self.read2_ref_id.to_le_bytes())?;
        w.write_all(&self.score.to_le_bytes())?;
        w.write_all(&self.read1_index.to_le_bytes())?;
        self.optical.write_to(w)?;
        self.representative_name.write_to(w)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        let mut buf4 = [0u8; 4];
        if r.read_exact(&mut buf4).is_err() {
            return Ok(None);
        }
        let library_id = i32::from_le_bytes(buf4);
        let barcodes = BarcodeTriple::read_from(r)?;
        r.read_exact(&mut buf4)?;
        let read1_ref_id = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let read1_coord = i32::from_le_bytes(buf4);
        let mut buf1 = [0u8; 1];
        r.read_exact(&mut buf1)?;
        let orientation = Orientation::from_u8(buf1[0]);
        r.read_exact(&mut buf4)?;
        let read2_ref_id = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let score = u32::from_le_bytes(buf4);
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let read1_index = u64::from_le_bytes(buf8);
        let optical = OpticalLocation::read_from(r)?;
        let representative_name = FixedName::read_from(r)?;
        Ok(Some(Self {
            library_id,
            barcodes,
            read1_ref_id,
            read1_coord,
            orientation,
            read2_ref_id,
            score,
            read1_index,
            optical,
            representative_name,
        }))
    }

    /// Whether this fragment is the primary side of a pair whose mate is
    /// mapped (spec §3's fragment-signature invariant).
    pub fn has_mapped_mate(&self) -> bool {
        self.read2_ref_id != -1
    }

    /// Comparability for the fragment sweep: same as the pair sweep but
    /// ignoring read2 fields entirely (spec §4.4).
    pub fn comparable(&self, other: &Self) -> bool {
        self.library_id == other.library_id
            && self.barcodes == other.barcodes
            && self.read1_ref_id == other.read1_ref_id
            && self.read1_coord == other.read1_coord
            && self.orientation == other.orientation
    }
}

impl crate::external_sort::SortRecord for PairSignature {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        PairSignature::write_to(self, w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        PairSignature::read_from(r)
    }
}

impl crate::external_sort::SortRecord for FragmentSignature {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        FragmentSignature::write_to(self, w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        FragmentSignature::read_from(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_pair() -> PairSignature {
        PairSignature {
            library_id: 3,
            barcodes: BarcodeTriple { barcode: Some(42), read_one_barcode: None, read_two_barcode: Some(7) },
            read1_ref_id: 0,
            read1_coord: 100,
            orientation: Orientation::FR,
            read2_ref_id: 0,
            read2_coord: 300,
            score: 55,
            read1_index: 10,
            read2_index: 11,
            optical: OpticalLocation { read_group_ordinal: 0, tile: 1101, x: 5000, y: 6000 },
            orientation_for_optical: Orientation::FR,
            representative_name: FixedName::from_bytes(b"read-A"),
        }
    }

    #[test]
    fn pair_signature_roundtrips() {
        let sig = sample_pair();
        let mut buf = Vec::new();
        sig.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let back = PairSignature::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(sig, back);
    }

    #[test]
    fn pair_signature_read_from_empty_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(PairSignature::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn fragment_signature_roundtrips() {
        let sig = FragmentSignature {
            library_id: 1,
            barcodes: BarcodeTriple::default(),
            read1_ref_id: 2,
            read1_coord: 42,
            orientation: Orientation::R,
            read2_ref_id: -1,
            score: 10,
            read1_index: 99,
            optical: OpticalLocation::sentinel(),
            representative_name: FixedName::absent(),
        };
        let mut buf = Vec::new();
        sig.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let back = FragmentSignature::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(sig, back);
        assert!(!back.has_mapped_mate());
    }

    #[test]
    fn fragment_with_mapped_mate_is_detected() {
        let sig = FragmentSignature {
            library_id: 0,
            barcodes: BarcodeTriple::default(),
            read1_ref_id: 0,
            read1_coord: 100,
            orientation: Orientation::F,
            read2_ref_id: 0,
            score: 10,
            read1_index: 0,
            optical: OpticalLocation::sentinel(),
            representative_name: FixedName::absent(),
        };
        assert!(sig.has_mapped_mate());
    }

    #[test]
    fn comparable_ignores_score_and_index() {
        let a = sample_pair();
        let mut b = sample_pair();
        b.score = 1;
        b.read1_index = 999;
        b.read2_index = 1000;
        assert!(a.comparable(&b));
        b.read1_coord += 1;
        assert!(!a.comparable(&b));
    }

    #[test]
    fn orientation_paired_encoding() {
        assert_eq!(Orientation::paired(false, false), Orientation::FF);
        assert_eq!(Orientation::paired(false, true), Orientation::FR);
        assert_eq!(Orientation::paired(true, false), Orientation::RF);
        assert_eq!(Orientation::paired(true, true), Orientation::RR);
    }

    #[test]
    fn fixed_name_caps_at_max_len() {
        let long = vec![b'a'; 500];
        let name = FixedName::from_bytes(&long);
        assert_eq!(name.as_bytes().len(), MAX_READ_NAME_LEN);
    }
}
