/// Fixed corrections for item names the extraction model reads slightly wrong.
pub fn assign_normalized_name(raw_name: &str) -> &str {
    match raw_name {
        "BIOD BANANEN" => "BIO BANANEN",
        "BIOD Paprika Mix" => "BIO Paprika Mix",
        other => other,
    }
}
