/// Generate an identity id: a random UUID rendered as 32 lowercase hex chars.
///
/// Ids name files on disk (`certs/<id>.crt`) and cache keys, so they must
/// stay filesystem-safe and free of separators.
pub fn generate_identity_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Whether `id` is safe to splice into a path under an organization root.
pub fn is_valid_identity_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
