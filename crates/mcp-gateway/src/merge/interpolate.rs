//! `${VAR}` and `$VAR` expansion against a resolved env map.
//!
//! Braced references are expanded first. Bare references only match
//! `[A-Z0-9_]+`. Unknown names are left verbatim in both forms.

use std::collections::BTreeMap;

pub type EnvMap = BTreeMap<String, String>;

fn expand_braced(s: &str, env: &EnvMap) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let end = start + len;
        out.push_str(&rest[..start]);
        match env.get(&rest[start + 2..end]) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..=end]),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_'
}

fn expand_bare(s: &str, env: &EnvMap) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let name_len = bytes[i + 1..].iter().take_while(|b| is_name_byte(**b)).count();
            if name_len > 0 {
                let end = i + 1 + name_len;
                if let Some(value) = env.get(&s[i + 1..end]) {
                    out.push_str(&s[copied..i]);
                    out.push_str(value);
                    copied = end;
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&s[copied..]);
    out
}

/// Expand env references in `s`.
pub fn interpolate_env_vars(s: &str, env: &EnvMap) -> String {
    if !s.contains('$') {
        return s.to_string();
    }
    expand_bare(&expand_braced(s, env), env)
}
