//! Stable record identity.

use gulp_core::Record;

/// Upper bound on synthetic IDs, counted in characters.
pub const MAX_DERIVED_ID_LEN: usize = 50;

/// Synthetic key from title, company and location: whitespace becomes `_`, the
/// result is lower-cased and cut to [`MAX_DERIVED_ID_LEN`] characters.
///
/// A record with none of the three fields yields `"__"`; callers get that key
/// rather than a rejection.
pub fn derive_id(record: &Record) -> String {
    format!(
        "{}_{}_{}",
        record.title(),
        record.company(),
        record.location()
    )
    .chars()
    .map(|c| if c.is_whitespace() { '_' } else { c })
    .flat_map(char::to_lowercase)
    .take(MAX_DERIVED_ID_LEN)
    .collect()
}

/// Returns the record's ID, deriving and writing one back when it is missing.
pub fn resolve_id(record: &mut Record) -> String {
    if !record.has_id() {
        record.id = derive_id(record);
    }
    record.id.clone()
}
