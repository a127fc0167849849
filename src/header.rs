//! Header-derived lookups: library ids, read-group ordinals, and the
//! input's declared sort order.

use anyhow::{bail, Result};
use noodles::bam;
use noodles::sam::alignment::record::data::field::{Tag, Value};
use noodles::sam::header::record::value::map::header::sort_order::SortOrder as HeaderSortOrder;
use noodles::sam::header::Header as SamHeader;
use std::collections::HashMap;

/// The two sort orders this engine supports; anything else is a fatal
/// configuration error (spec §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Coordinate,
    QueryName,
}

pub fn detect_sort_order(header: &SamHeader) -> Result<SortOrder> {
    match header.header().and_then(|h| h.sort_order()) {
        Some(HeaderSortOrder::Coordinate) => Ok(SortOrder::Coordinate),
        Some(HeaderSortOrder::QueryName) => Ok(SortOrder::QueryName),
        other => bail!(
            "unsupported or missing @HD SO: sort order ({:?}); expected coordinate or queryname",
            other
        ),
    }
}

/// Unknown-library sentinel used when a record's read group is missing or
/// doesn't resolve to a library name (spec §4.11, recoverable failure).
pub const UNKNOWN_LIBRARY: &str = "Unknown Library";

/// Resolves read groups to library ids and ordinals, built once from the
/// header at startup (spec §4.3 "Library id").
pub struct LibraryResolver {
    /// Library name -> compact integer id, in first-seen order.
    library_ids: HashMap<String, i32>,
    /// Read-group id -> (library id, read-group ordinal).
    read_groups: HashMap<Vec<u8>, (i32, i32)>,
    pub library_names: Vec<String>,
}

impl LibraryResolver {
    pub fn from_header(header: &SamHeader) -> Self {
        let mut library_ids: HashMap<String, i32> = HashMap::new();
        let mut library_names = Vec::new();
        let mut read_groups = HashMap::new();

        for (ordinal, (rg_id, rg)) in header.read_groups().iter().enumerate() {
            let lib_name = rg
                .other_fields()
                .get(Tag::LIBRARY.as_ref())
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN_LIBRARY.to_string());
            let lib_id = *library_ids.entry(lib_name.clone()).or_insert_with(|| {
                library_names.push(lib_name.clone());
                (library_names.len() - 1) as i32
            });
            read_groups.insert(rg_id.to_vec(), (lib_id, ordinal as i32));
        }

        if library_names.is_empty() {
            library_names.push(UNKNOWN_LIBRARY.to_string());
            library_ids.insert(UNKNOWN_LIBRARY.to_string(), 0);
        }

        Self { library_ids, read_groups, library_names }
    }

    fn read_group_id(record: &bam::Record) -> Option<Vec<u8>> {
        read_group_id(record)
    }

    /// `(library_id, read_group_ordinal)`, defaulting to `(Unknown Library,
    /// 0)` when the record has no (resolvable) read group.
    pub fn resolve(&self, record: &bam::Record) -> (i32, i32) {
        match Self::read_group_id(record).and_then(|id| self.read_groups.get(&id).copied()) {
            Some(pair) => pair,
            None => (*self.library_ids.get(UNKNOWN_LIBRARY).unwrap_or(&0), 0),
        }
    }

    pub fn library_count(&self) -> usize {
        self.library_names.len()
    }
}

/// Raw `RG` tag value of a record, if present and well-formed. Used both by
/// [`LibraryResolver::resolve`] and by the unmatched-mate map's key (spec
/// §4.2's `"<read-group-id>:<query-name>"`).
pub fn read_group_id(record: &bam::Record) -> Option<Vec<u8>> {
    match record.data().get(Tag::READ_GROUP.as_ref())?.ok()? {
        Value::String(s) => Some(s.as_ref().to_vec()),
        _ => None,
    }
}

/// Hash a configured tag's string value with FxHash into the signature's
/// optional barcode slot; absent/non-string tags yield `None`.
pub fn hashed_tag_value(record: &bam::Record, tag: &[u8; 2]) -> Option<u64> {
    let value = record.data().get(tag.as_slice())?.ok()?;
    match value {
        Value::String(s) => Some(fxhash::hash64(s.as_ref())),
        _ => None,
    }
}

/// Resolved `BARCODE_TAG`/`READ_ONE_BARCODE_TAG`/`READ_TWO_BARCODE_TAG`
/// configuration (spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct BarcodeConfig {
    pub barcode_tag: Option<[u8; 2]>,
    pub read_one_tag: Option<[u8; 2]>,
    pub read_two_tag: Option<[u8; 2]>,
}

impl BarcodeConfig {
    pub fn in_use(&self) -> bool {
        self.barcode_tag.is_some() || self.read_one_tag.is_some() || self.read_two_tag.is_some()
    }

    /// Per-read barcode triple: the general molecular barcode plus whichever
    /// of the read-one/read-two tags applies to this physical mate (first-
    /// or second-of-pair); unpaired reads only ever populate the general
    /// slot.
    pub fn triple_for_record(&self, record: &bam::Record) -> crate::signature::BarcodeTriple {
        let barcode = self.barcode_tag.and_then(|t| hashed_tag_value(record, &t));
        let flags = record.flags();
        let (read_one_barcode, read_two_barcode) = if flags.is_segmented() && flags.is_first_segment() {
            (self.read_one_tag.and_then(|t| hashed_tag_value(record, &t)), None)
        } else if flags.is_segmented() && flags.is_last_segment() {
            (None, self.read_two_tag.and_then(|t| hashed_tag_value(record, &t)))
        } else {
            (None, None)
        };
        crate::signature::BarcodeTriple { barcode, read_one_barcode, read_two_barcode }
    }
}

/// Parse a two-character SAM tag name (e.g. `"BX"`) from a CLI option.
pub fn parse_tag(s: &str) -> Result<[u8; 2]> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        bail!("tag names must be exactly two characters, got {:?}", s);
    }
    Ok([bytes[0], bytes[1]])
}

/// Extract `(tile, x, y)` from a query name using `READ_NAME_REGEX`'s
/// capture groups 1-3, matching the convention of comparable duplicate
/// markers. Returns `None` when the regex doesn't match or a captured
/// group fails to parse as an integer - a recoverable degradation (spec
/// §4.11), not a failure.
pub fn parse_optical_coordinates(regex: &regex::Regex, query_name: &[u8]) -> Option<(i32, i32, i32)> {
    let name = std::str::from_utf8(query_name).ok()?;
    let caps = regex.captures(name)?;
    let tile: i32 = caps.get(1)?.as_str().parse().ok()?;
    let x: i32 = caps.get(2)?.as_str().parse().ok()?;
    let y: i32 = caps.get(3)?.as_str().parse().ok()?;
    Some((tile, x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tag_accepts_two_chars() {
        assert_eq!(parse_tag("BX").unwrap(), *b"BX");
    }

    #[test]
    fn parse_tag_rejects_wrong_length() {
        assert!(parse_tag("BARCODE").is_err());
    }

    #[test]
    fn parse_optical_coordinates_matches_illumina_style_names() {
        let re = regex::Regex::new(r"(?:.*:)?([0-9]+):([0-9]+):([0-9]+)$").unwrap();
        let name = b"INSTR:1:FLOWCELL:2:1101:5000:6000";
        assert_eq!(parse_optical_coordinates(&re, name), Some((1101, 5000, 6000)));
    }

    #[test]
    fn parse_optical_coordinates_none_on_mismatch() {
        let re = regex::Regex::new(r"(?:.*:)?([0-9]+):([0-9]+):([0-9]+)$").unwrap();
        assert_eq!(parse_optical_coordinates(&re, b"not-a-match"), None);
    }
}
