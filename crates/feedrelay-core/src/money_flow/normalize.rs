/// Canonical entity name: uppercase, `&` spelled `AND`, punctuation dropped,
/// whitespace collapsed. Idempotent.
pub fn normalize_entity(name: &str) -> String {
    let mut expanded = String::with_capacity(name.len() + 8);
    for ch in name.chars().flat_map(char::to_uppercase) {
        match ch {
            '&' => expanded.push_str(" AND "),
            c if c.is_alphanumeric() || c.is_whitespace() => expanded.push(c),
            _ => {}
        }
    }
    expanded.split_whitespace().collect::<Vec<_>>().join(" ")
}
