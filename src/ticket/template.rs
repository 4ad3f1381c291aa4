//! `$var` / `${var}` template substitution, matching Python's
//! `string.Template.safe_substitute`: unknown identifiers are left
//! untouched rather than raising, and `$$` escapes a literal `$`. Used to
//! expand the Bugzilla summary/description templates from
//! `Config.bugzilla_reboot_template` (grounded on
//! `original_source/.../file_bugzilla_bug.py`).

use std::collections::HashMap;

pub fn safe_substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '$' {
            out.push(c);
            i += 1;
            continue;
        }

        if i + 1 >= chars.len() {
            out.push('$');
            break;
        }

        match chars[i + 1] {
            '$' => {
                out.push('$');
                i += 2;
            }
            '{' => {
                if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    match vars.get(&name) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&format!("${{{name}}}")),
                    }
                    i += 2 + close + 1;
                } else {
                    out.push_str("${");
                    i += 2;
                }
            }
            next if next.is_ascii_alphabetic() || next == '_' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('$');
                        out.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("worker_id".to_string(), "t-w1064-ms-001".to_string());
        m.insert("mechanism".to_string(), "ipmi_reset".to_string());
        m
    }

    #[test]
    fn substitutes_bare_and_braced_identifiers() {
        let out = safe_substitute("$worker_id failed via ${mechanism}", &vars());
        assert_eq!(out, "t-w1064-ms-001 failed via ipmi_reset");
    }

    #[test]
    fn leaves_unknown_identifiers_untouched() {
        let out = safe_substitute("$worker_id / $unknown_var", &vars());
        assert_eq!(out, "t-w1064-ms-001 / $unknown_var");
    }

    #[test]
    fn dollar_dollar_escapes_a_literal_dollar() {
        let out = safe_substitute("cost: $$5 for $worker_id", &vars());
        assert_eq!(out, "cost: $5 for t-w1064-ms-001");
    }

    #[test]
    fn trailing_dollar_is_passed_through() {
        assert_eq!(safe_substitute("abc$", &vars()), "abc$");
    }
}
