/// Expand `${NAME}` and `${NAME:-fallback}` placeholders against the process
/// environment.
///
/// A placeholder whose variable is unset and carries no fallback is kept
/// verbatim so the parse error (if any) points at the original text.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: emit the remainder untouched.
            out.push_str(&rest[start..]);
            return out;
        };

        let inner = &after[..end];
        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (inner, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(inner);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        (name == "SKILLPORT_TEST_TOKEN").then(|| "ghp_123".to_string())
    }

    #[test]
    fn expands_known_variable() {
        assert_eq!(
            expand("token = \"${SKILLPORT_TEST_TOKEN}\"", lookup),
            "token = \"ghp_123\""
        );
    }

    #[test]
    fn uses_fallback_for_unset_variable() {
        assert_eq!(
            expand("${SKILLPORT_MISSING:-https://api.github.com}", lookup),
            "https://api.github.com"
        );
    }

    #[test]
    fn keeps_unknown_placeholder_verbatim() {
        assert_eq!(expand("a${SKILLPORT_MISSING}b", lookup), "a${SKILLPORT_MISSING}b");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(expand("x = ${OOPS", lookup), "x = ${OOPS");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(substitute_env("no placeholders here"), "no placeholders here");
    }
}
