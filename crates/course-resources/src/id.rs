use once_cell::sync::Lazy;
use regex::Regex;

pub const UUID_PREFIX: &str = "urn:mrn:signalk:uuid:";

static RESOURCE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:mrn:signalk:uuid:[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-4[0-9A-Fa-f]{3}-[89ABab][0-9A-Fa-f]{3}-[0-9A-Fa-f]{12}$")
        .expect("resource id pattern")
});

static FILE_STEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Za-z_-]{1,64}$").expect("file stem pattern"));

/// True for `urn:mrn:signalk:uuid:<v4 uuid>`.
pub fn is_resource_id(id: &str) -> bool {
    RESOURCE_ID.is_match(id)
}

/// The bare uuid of a valid resource id, used as the on-disk file name.
pub fn file_name(id: &str) -> Option<&str> {
    if is_resource_id(id) { id.strip_prefix(UUID_PREFIX) } else { None }
}

pub fn to_resource_id(file_name: &str) -> String {
    format!("{}{}", UUID_PREFIX, file_name)
}

pub(crate) fn is_file_stem(s: &str) -> bool {
    FILE_STEM.is_match(s)
}
