//! Attribute-value postings index.
//!
//! State is `field_name -> (value -> bitmap-of-ids)`. Outer and inner
//! maps are both `DashMap`s so concurrent readers (search) and the
//! single state-machine writer never block each other field-wide —
//! only the specific `(field, value)` bucket being mutated is
//! contended, matching the sharded-locking idiom the rest of this
//! workspace already leans on for hot maps.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use hyperspace_core::FilterOp;
use roaring::RoaringBitmap;

use crate::error::IndexError;

#[derive(Default)]
pub struct FilterIndex {
    fields: DashMap<String, DashMap<i64, RoaringBitmap>>,
}

impl FilterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// `add(field, value, id)`: create the bitmap if absent; set bit
    /// `id`.
    pub fn add(&self, field: &str, value: i64, id: u64) {
        let field_map = self.fields.entry(field.to_string()).or_default();
        field_map.entry(value).or_default().insert(id as u32);
    }

    /// `update(field, old_value?, new_value, id)`: clears `id` from
    /// the old bucket (if both the field is tracked and an old value
    /// was supplied) and sets it in the new one. Degrades to `add`
    /// when the field isn't tracked yet at all.
    pub fn update(&self, field: &str, old_value: Option<i64>, new_value: i64, id: u64) {
        if !self.fields.contains_key(field) {
            self.add(field, new_value, id);
            return;
        }
        if let Some(old) = old_value {
            if let Some(field_map) = self.fields.get(field) {
                if let Some(mut bitmap) = field_map.get_mut(&old) {
                    bitmap.remove(id as u32);
                }
            }
        }
        self.add(field, new_value, id);
    }

    /// `bitmap(field, op, value)`: OR-in the matching bucket(s). The
    /// caller owns the returned bitmap.
    pub fn bitmap(&self, field: &str, op: FilterOp, value: i64) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        let Some(field_map) = self.fields.get(field) else {
            return result;
        };
        match op {
            FilterOp::Equal => {
                if let Some(bucket) = field_map.get(&value) {
                    result |= &*bucket;
                }
            }
            FilterOp::NotEqual => {
                for entry in field_map.iter() {
                    if *entry.key() != value {
                        result |= entry.value();
                    }
                }
            }
        }
        result
    }

    /// Length-prefixed framing per `(field, value, bitmap)` record:
    /// `u32 field_len, field bytes, i64 value, u32 bitmap_len, bitmap
    /// bytes`. Avoids the ambiguity a naive newline-terminated line
    /// format would have, since field names or bitmap bytes may
    /// themselves contain `\n` — mirrors the WAL's own length-prefixed
    /// approach instead.
    pub fn serialize(&self) -> Result<Vec<u8>, IndexError> {
        let mut buf = Vec::new();
        for field_entry in self.fields.iter() {
            let field = field_entry.key();
            for value_entry in field_entry.value().iter() {
                let value = *value_entry.key();
                let bitmap = value_entry.value();

                let field_bytes = field.as_bytes();
                buf.write_u32::<LittleEndian>(field_bytes.len() as u32)?;
                buf.write_all(field_bytes)?;
                buf.write_i64::<LittleEndian>(value)?;

                let mut bitmap_bytes = Vec::new();
                bitmap.serialize_into(&mut bitmap_bytes)?;
                buf.write_u32::<LittleEndian>(bitmap_bytes.len() as u32)?;
                buf.write_all(&bitmap_bytes)?;
            }
        }
        Ok(buf)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, IndexError> {
        let index = Self::new();
        let mut cursor = bytes;
        while !cursor.is_empty() {
            let field_len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut field_bytes = vec![0u8; field_len];
            cursor.read_exact(&mut field_bytes)?;
            let field = String::from_utf8(field_bytes)
                .map_err(|e| IndexError::Corrupt(format!("field name not utf8: {e}")))?;

            let value = cursor.read_i64::<LittleEndian>()?;

            let bitmap_len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut bitmap_bytes = vec![0u8; bitmap_len];
            cursor.read_exact(&mut bitmap_bytes)?;
            let bitmap = RoaringBitmap::deserialize_from(&bitmap_bytes[..])
                .map_err(|e| IndexError::Corrupt(format!("bad bitmap: {e}")))?;

            index
                .fields
                .entry(field)
                .or_default()
                .insert(value, bitmap);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_equal_bitmap_contains_id() {
        let idx = FilterIndex::new();
        idx.add("tag", 5, 1);
        idx.add("tag", 5, 2);
        idx.add("tag", 9, 3);

        let eq5 = idx.bitmap("tag", FilterOp::Equal, 5);
        assert!(eq5.contains(1) && eq5.contains(2) && !eq5.contains(3));

        let ne5 = idx.bitmap("tag", FilterOp::NotEqual, 5);
        assert!(!ne5.contains(1) && !ne5.contains(2) && ne5.contains(3));
    }

    #[test]
    fn update_moves_id_between_buckets() {
        let idx = FilterIndex::new();
        idx.add("tag", 5, 1);
        idx.update("tag", Some(5), 9, 1);

        assert!(idx.bitmap("tag", FilterOp::Equal, 5).is_empty());
        assert!(idx.bitmap("tag", FilterOp::Equal, 9).contains(1));
    }

    #[test]
    fn update_on_untracked_field_degrades_to_add() {
        let idx = FilterIndex::new();
        idx.update("fresh", None, 42, 7);
        assert!(idx.bitmap("fresh", FilterOp::Equal, 42).contains(7));
    }

    #[test]
    fn serialize_round_trips_through_bytes_containing_newlines() {
        let idx = FilterIndex::new();
        // Force a big enough bitmap that its serialized bytes are
        // likely to contain 0x0A somewhere, exercising exactly the
        // ambiguity the length-prefixed framing is meant to avoid.
        for id in 0..5000u64 {
            idx.add("tag", (id % 7) as i64, id);
        }
        let bytes = idx.serialize().unwrap();
        let restored = FilterIndex::deserialize(&bytes).unwrap();
        for v in 0..7i64 {
            assert_eq!(
                idx.bitmap("tag", FilterOp::Equal, v),
                restored.bitmap("tag", FilterOp::Equal, v)
            );
        }
    }
}
