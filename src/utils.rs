/// Make an arbitrary id safe to embed in a GLSL identifier.
///
/// Non `[A-Za-z0-9_]` characters become `_`; runs of `_` collapse and
/// leading/trailing `_` are dropped, since GLSL reserves `__`.
pub fn sanitize_glsl_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        let ch = if ch.is_ascii_alphanumeric() { ch } else { '_' };
        if ch == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(ch);
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push('n');
    }
    out
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_plain_ids() {
        assert_eq!(sanitize_glsl_ident("node12"), "node12");
        assert_eq!(sanitize_glsl_ident("a_b"), "a_b");
    }

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_glsl_ident("my-node id"), "my_node_id");
        assert_eq!(sanitize_glsl_ident("__x--y__"), "x_y");
        assert_eq!(sanitize_glsl_ident("---"), "n");
    }

    #[test]
    fn fnv1a64_known_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
