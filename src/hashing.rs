//! Content hash of one attendance row chained to its predecessor.
//!
//! The bytes fed to SHA-256 follow a fixed layout (v1): a JSON object with
//! the keys in lexicographic order, `": "` between key and value, `", "`
//! between members, integers in decimal and strings escaped to pure ASCII.
//!
//! ```text
//! {"date": "2024-01-10", "hour": 1, "previous_hash": "00..00", "status": "Present", "student_id": 1, "subject": "Math"}
//! ```
//!
//! The layout is written out by hand rather than through a serializer so it
//! cannot drift with a dependency upgrade. Chains already in the store were
//! written in exactly this form.

use std::fmt::Write;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::models::Status;

/// Previous hash of the first record in the chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub const HASH_ENCODING_VERSION: u8 = 1;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub student_id: i64,
    pub subject: &'a str,
    pub date: NaiveDate,
    pub status: Status,
    pub hour: i64,
    pub previous_hash: &'a str,
}

impl<'a> HashInput<'a> {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(160 + self.subject.len());
        out.push('{');
        push_member(&mut out, "date", |out| {
            push_json_str(out, &self.date.format(DATE_FORMAT).to_string())
        });
        out.push_str(", ");
        push_member(&mut out, "hour", |out| {
            let _ = write!(out, "{}", self.hour);
        });
        out.push_str(", ");
        push_member(&mut out, "previous_hash", |out| {
            push_json_str(out, self.previous_hash)
        });
        out.push_str(", ");
        push_member(&mut out, "status", |out| {
            push_json_str(out, self.status.as_str())
        });
        out.push_str(", ");
        push_member(&mut out, "student_id", |out| {
            let _ = write!(out, "{}", self.student_id);
        });
        out.push_str(", ");
        push_member(&mut out, "subject", |out| push_json_str(out, self.subject));
        out.push('}');
        out.into_bytes()
    }

    pub fn digest(&self) -> String {
        let mut hasher: Sha256 = Digest::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Hash of one record given the hash of the record before it.
pub fn record_hash(
    student_id: i64,
    subject: &str,
    date: NaiveDate,
    status: Status,
    hour: i64,
    previous_hash: &str,
) -> String {
    HashInput {
        student_id,
        subject,
        date,
        status,
        hour,
        previous_hash,
    }
    .digest()
}

fn push_member(out: &mut String, key: &str, value: impl FnOnce(&mut String)) {
    push_json_str(out, key);
    out.push_str(": ");
    value(out);
}

fn push_json_str(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(ch),
            _ => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    #[test]
    fn canonical_layout_is_sorted_json() {
        let input = HashInput {
            student_id: 1,
            subject: "Math",
            date: date(),
            status: Status::Present,
            hour: 1,
            previous_hash: GENESIS_HASH,
        };
        let expected = format!(
            "{{\"date\": \"2024-01-10\", \"hour\": 1, \"previous_hash\": \"{}\", \"status\": \"Present\", \"student_id\": 1, \"subject\": \"Math\"}}",
            GENESIS_HASH
        );
        assert_eq!(String::from_utf8(input.canonical_bytes()).unwrap(), expected);
    }

    #[test]
    fn known_vectors() {
        let first = record_hash(1, "Math", date(), Status::Present, 1, GENESIS_HASH);
        assert_eq!(
            first,
            "1fa4ca254d98f90006377c383df9abc59e634725c0018a18bd849e491aad1a46"
        );
        let second = record_hash(2, "Math", date(), Status::Absent, 1, &first);
        assert_eq!(
            second,
            "cab2c17eb6001c0c6b7f2d91eb76c400ffea475c17755bde9ec6b4ae1fd11784"
        );
    }

    #[test]
    fn escapes_quotes_controls_and_non_ascii() {
        let subject = "Éco \"avancée\"\n\\";
        let input = HashInput {
            student_id: 7,
            subject,
            date: date(),
            status: Status::Absent,
            hour: 3,
            previous_hash: GENESIS_HASH,
        };
        let text = String::from_utf8(input.canonical_bytes()).unwrap();
        assert!(text.ends_with("\"subject\": \"\\u00c9co \\\"avanc\\u00e9e\\\"\\n\\\\\"}"));
        assert_eq!(
            input.digest(),
            "24f0be76d26f110471d8879826d16319c5a9aea3cde374d21a5992bf9c755be1"
        );
    }

    #[test]
    fn astral_characters_become_surrogate_pairs() {
        let hash = record_hash(7, "数学 😀", date(), Status::Absent, 3, GENESIS_HASH);
        assert_eq!(
            hash,
            "64b5da9f8a87f3390dfc76c8cd898b6d97eeb687ccb42a572980876f3ed1503f"
        );
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let base = record_hash(1, "Math", date(), Status::Present, 1, GENESIS_HASH);
        let other_day = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
        let variants = [
            record_hash(2, "Math", date(), Status::Present, 1, GENESIS_HASH),
            record_hash(1, "math", date(), Status::Present, 1, GENESIS_HASH),
            record_hash(1, "Math", other_day, Status::Present, 1, GENESIS_HASH),
            record_hash(1, "Math", date(), Status::Absent, 1, GENESIS_HASH),
            record_hash(1, "Math", date(), Status::Present, 2, GENESIS_HASH),
            record_hash(1, "Math", date(), Status::Present, 1, &base),
        ];
        for variant in variants.iter() {
            assert_ne!(variant, &base);
        }
    }

    #[test]
    fn hashes_are_lowercase_hex_of_genesis_length() {
        let hash = record_hash(1, "Math", date(), Status::Present, 1, GENESIS_HASH);
        assert_eq!(hash.len(), GENESIS_HASH.len());
        assert!(hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }
}
