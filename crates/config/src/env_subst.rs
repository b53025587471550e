/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unset variables and malformed placeholders are left untouched.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        let placeholder = &rest[start..start + 2 + end + 1];
        match is_var_name(name).then(|| lookup(name)).flatten() {
            Some(value) => out.push_str(&value),
            None => out.push_str(placeholder),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
