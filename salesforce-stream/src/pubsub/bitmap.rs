//! Change-field bitmap decoding.
//!
//! Change data capture events encode the set of changed fields as a hex
//! string whose bytes, once reversed, form a little-endian bit set over the
//! fields of the record schema. Further entries of the form
//! `parentBitPosition-childBitmap` describe changes inside compound fields.

use tracing::debug;

/// Errors that can occur while expanding a bitmap.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// The bitmap is not valid hex.
    #[error("Invalid hex bitmap {bitmap:?}: {source}")]
    InvalidHex {
        /// Offending bitmap, without the `0x` prefix.
        bitmap: String,
        #[source]
        source: hex::FromHexError,
    },
    /// A set bit points past the last schema field.
    #[error("Bit {index} is out of range for {field_count} fields")]
    OutOfRange {
        /// Index of the set bit.
        index: usize,
        /// Number of fields in the schema.
        field_count: usize,
    },
}

/// Returns the names of the fields marked in `bitmaps`, in schema order.
///
/// Only the top-level bitmap (the first entry, prefixed with `0x`) is
/// expanded. Nested `parent-child` bitmaps are ignored.
///
/// # Errors
///
/// Returns [`Error::InvalidHex`] if the bitmap is not valid hex, and
/// [`Error::OutOfRange`] if a set bit has no matching field.
///
/// # Examples
///
/// ```
/// use salesforce_stream::pubsub::changed_field_names;
///
/// let fields = ["Id", "Name", "Amount"];
/// let changed = changed_field_names(&fields, &["0x03"]).unwrap();
/// assert_eq!(changed, vec!["Id", "Name"]);
/// ```
pub fn changed_field_names<F, B>(field_names: &[F], bitmaps: &[B]) -> Result<Vec<String>, Error>
where
    F: AsRef<str>,
    B: AsRef<str>,
{
    let mut changed = Vec::new();
    let Some((first, nested)) = bitmaps.split_first() else {
        return Ok(changed);
    };

    let mut nested = nested;
    if let Some(hex_str) = first.as_ref().strip_prefix("0x") {
        let mut bytes = hex::decode(hex_str).map_err(|source| Error::InvalidHex {
            bitmap: hex_str.to_string(),
            source,
        })?;
        bytes.reverse();

        for index in set_bits(&bytes) {
            let name = field_names.get(index).ok_or(Error::OutOfRange {
                index,
                field_count: field_names.len(),
            })?;
            changed.push(name.as_ref().to_string());
        }
    } else {
        nested = bitmaps;
    }

    if !nested.is_empty() {
        debug!(
            count = nested.len(),
            "Ignoring nested change bitmaps for compound fields"
        );
    }

    Ok(changed)
}

fn set_bits(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    (0..bytes.len() * 8).filter(move |i| (bytes[i / 8] >> (i % 8)) & 1 == 1)
}
