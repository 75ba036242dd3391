use crate::error::SlotError;

/// Maximum slot-name length in bytes, including the trailing NUL of the
/// on-disk record; valid names are 1..=NAME_MAX-1 bytes.
pub const NAME_MAX: usize = 64;

/// Checks a user-supplied slot name against the slot-name grammar.
///
/// Names may consist of `[a-z0-9_?<!\-.]{1,NAME_MAX-1}`, which keeps every
/// valid name usable as a directory name on all supported filesystems.
pub fn validate_slot_name(name: &str) -> Result<(), SlotError> {
    if name.is_empty() {
        return Err(SlotError::InvalidName {
            name: name.to_string(),
            reason: "name is too short",
        });
    }
    if name.len() >= NAME_MAX {
        return Err(SlotError::NameTooLong {
            name: name.to_string(),
        });
    }
    for byte in name.bytes() {
        let ok = byte.is_ascii_lowercase()
            || byte.is_ascii_digit()
            || matches!(byte, b'_' | b'?' | b'<' | b'!' | b'-' | b'.');
        if !ok {
            return Err(SlotError::InvalidName {
                name: name.to_string(),
                reason: "name contains invalid character",
            });
        }
    }
    Ok(())
}
