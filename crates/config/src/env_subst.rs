/// Expand `$VAR` and `${VAR}` placeholders in topology string values.
///
/// Unset variables expand to the empty string. A `$` that does not start a
/// placeholder is kept literally, as is an unterminated `${`.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with a caller-supplied variable lookup.
pub fn substitute_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains('$') {
        return input.to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('{') => {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    var_name.push(c);
                }
                if closed && !var_name.is_empty() {
                    result.push_str(&lookup(&var_name).unwrap_or_default());
                } else {
                    // Malformed, emit literal.
                    result.push_str("${");
                    result.push_str(&var_name);
                    if closed {
                        result.push('}');
                    }
                }
            },
            Some(c) if is_name_char(c) => {
                let mut var_name = String::new();
                while let Some(c) = chars.next_if(|c| is_name_char(*c)) {
                    var_name.push(c);
                }
                result.push_str(&lookup(&var_name).unwrap_or_default());
            },
            _ => result.push('$'),
        }
    }

    result
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
