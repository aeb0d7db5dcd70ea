/// Lowercase hex rendering, used for serial numbers and fingerprints.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

pub fn hex_decode(input: &str) -> Result<Vec<u8>, String> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        return Err("hex string must have even length".to_string());
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks(2) {
        let hi = (pair[0] as char).to_digit(16);
        let lo = (pair[1] as char).to_digit(16);
        let (Some(hi), Some(lo)) = (hi, lo) else {
            return Err(format!(
                "invalid hex pair: {}{}",
                pair[0] as char, pair[1] as char
            ));
        };
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// Pull the first PEM block with the given label out of `text`.
///
/// Certificates written by `openssl ca` carry a human-readable dump in
/// front of the PEM armour; client profiles must embed only the armour.
/// Returns the block trimmed, without a trailing newline.
pub fn pem_block<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = text.find(&begin)?;
    let stop = text[start..].find(&end)? + start + end.len();
    Some(&text[start..stop])
}
