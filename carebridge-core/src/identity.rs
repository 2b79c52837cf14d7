//! Identity types for CareBridge entities
//!
//! Every entity is identified by a wide identifier (a UUID) assigned once by
//! the storage layer. Legacy consumers that only understand small integers get
//! a narrow identifier derived from it: the first 32 bits of the SHA-256 digest
//! of the UUID's canonical text, read as a two's-complement `i32`.
//!
//! The narrow space is 32 bits wide, so distinct wide ids can map to the same
//! narrow id. Nothing here detects or resolves that.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::IdentityError;

/// Wide identifier (primary key). UUIDv7 for newly created entities.
pub type WideId = Uuid;

/// Narrow identifier (secondary key) derived from a [`WideId`].
pub type NarrowId = i32;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Number of digest bytes that make up a narrow id.
const NARROW_ID_BYTES: usize = 4;

/// Generate a new UUIDv7 wide id (timestamp-sortable).
pub fn new_wide_id() -> WideId {
    Uuid::now_v7()
}

/// Parse a wide identifier from text.
///
/// Accepts the hyphenated, simple, braced and URN forms in any letter case.
/// Surrounding whitespace is rejected.
pub fn parse_wide_id(input: &str) -> Result<WideId, IdentityError> {
    Uuid::parse_str(input).map_err(|_| IdentityError::InvalidIdentifierFormat {
        input: input.to_string(),
    })
}

/// Canonical text of a wide id: lowercase and hyphenated, matching `uuid::text`.
pub fn canonical_form(id: WideId) -> String {
    id.hyphenated().to_string()
}

fn narrow_digest(id: WideId) -> [u8; NARROW_ID_BYTES] {
    let mut buf = Uuid::encode_buffer();
    let text = id.hyphenated().encode_lower(&mut buf);
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; NARROW_ID_BYTES];
    prefix.copy_from_slice(&digest[..NARROW_ID_BYTES]);
    prefix
}

/// Derive the narrow identifier for a wide identifier.
///
/// Pure and unsalted: the same wide id maps to the same narrow id for the
/// lifetime of the system. Negative results are expected.
pub fn derive_narrow_id(id: WideId) -> NarrowId {
    i32::from_be_bytes(narrow_digest(id))
}

/// Parse `input` as a wide id and derive its narrow id.
pub fn derive_narrow_id_str(input: &str) -> Result<NarrowId, IdentityError> {
    parse_wide_id(input).map(derive_narrow_id)
}

/// The 8 hex characters of the digest that the narrow id is read from.
pub fn narrow_id_hex_prefix(id: WideId) -> String {
    hex::encode(narrow_digest(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGRESSION_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

    #[test]
    fn test_new_wide_id_is_v7() {
        let id = new_wide_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_regression_literal() -> Result<(), IdentityError> {
        assert_eq!(derive_narrow_id_str(REGRESSION_ID)?, -1_737_749_047);
        Ok(())
    }

    #[test]
    fn test_hex_prefix_matches_narrow_id() -> Result<(), IdentityError> {
        let id = parse_wide_id(REGRESSION_ID)?;
        let prefix = narrow_id_hex_prefix(id);
        assert_eq!(prefix, "986c0dc9");
        let from_hex = u32::from_str_radix(&prefix, 16).map(|v| v as i32);
        assert_eq!(from_hex, Ok(derive_narrow_id(id)));
        Ok(())
    }

    #[test]
    fn test_nil_uuid_is_valid() {
        assert_eq!(derive_narrow_id(Uuid::nil()), 314_128_252);
    }

    #[test]
    fn test_negative_values_are_produced() -> Result<(), IdentityError> {
        let id = parse_wide_id("6ba7b810-9dad-11d1-80b4-00c04fd430c8")?;
        assert_eq!(derive_narrow_id(id), -444_243_980);
        Ok(())
    }

    #[test]
    fn test_textual_variants_derive_same() -> Result<(), IdentityError> {
        let canonical = derive_narrow_id_str(REGRESSION_ID)?;
        for variant in [
            "123E4567-E89B-12D3-A456-426614174000",
            "123e4567e89b12d3a456426614174000",
            "{123e4567-e89b-12d3-a456-426614174000}",
            "urn:uuid:123e4567-e89b-12d3-a456-426614174000",
        ] {
            assert_eq!(derive_narrow_id_str(variant)?, canonical, "variant {variant}");
        }
        Ok(())
    }

    #[test]
    fn test_malformed_input_rejected() {
        for input in [
            "not-a-valid-wide-id",
            "",
            "123e4567-e89b-12d3-a456-42661417400",
            "123e4567-e89b-12d3-a456-4266141740000",
            "g23e4567-e89b-12d3-a456-426614174000",
            "  123e4567-e89b-12d3-a456-426614174000 ",
            "123e4567-e89b-12d3-a456-426614174000\n",
            "42",
        ] {
            let result = derive_narrow_id_str(input);
            assert_eq!(
                result,
                Err(IdentityError::InvalidIdentifierFormat {
                    input: input.to_string()
                })
            );
        }
    }

    #[test]
    fn test_canonical_form_is_lowercase_hyphenated() -> Result<(), IdentityError> {
        let id = parse_wide_id("123E4567E89B12D3A456426614174000")?;
        assert_eq!(canonical_form(id), REGRESSION_ID);
        Ok(())
    }

    #[test]
    fn test_known_collision_is_not_detected() -> Result<(), IdentityError> {
        let a = parse_wide_id("00000000-0000-0000-0000-000000002a70")?;
        let b = parse_wide_id("00000000-0000-0000-0000-000000010a81")?;
        assert_ne!(a, b);
        assert_eq!(derive_narrow_id(a), 1_308_029_488);
        assert_eq!(derive_narrow_id(a), derive_narrow_id(b));
        Ok(())
    }
}
