//! Identifier case conversion: model property names (camelCase) to storage names (snake_case).

/// Convert a single identifier from camelCase / PascalCase to snake_case.
/// e.g. "userId" -> "user_id", "BlogPost" -> "blog_post"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Storage column for a model property.
pub fn column_name(property: &str) -> String {
    to_snake_case(property)
}

/// Default table name for a model.
pub fn table_name(model: &str) -> String {
    to_snake_case(model)
}
