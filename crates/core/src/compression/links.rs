//! URL list simplification and the two-tier link codec.
//!
//! A list of URLs is first factored into groups: one group per scheme and
//! domain, with the longest common slash-terminated path prefix pulled out
//! and the remaining suffixes joined by `|` inside `<...>`:
//!
//! ```text
//! cdn.example.com/a/x.jpg, cdn.example.com/a/y.jpg  ->  cdn.example.com/a/<x.jpg|y.jpg>
//! http://plain.org                                  ->  h:plain.org<>
//! https://secure.org/                               ->  secure.org/<>
//! ```
//!
//! HTTPS is implied; `h:` tags plain HTTP groups. URLs with no scheme are
//! treated as HTTPS. `|`, `<` and `>` inside a URL are percent-escaped so
//! they cannot be read as group syntax.
//!
//! The simplified string is then bit-packed: characters of the primary
//! alphabet take a `0` flag and 6 bits, characters of the secondary alphabet
//! take a `1` flag and 4 bits.

use super::bits::{BitReader, BitWriter};
use crate::error::{ProtocolError, Result};

pub const PRIMARY: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/*";
pub const SECONDARY: &[u8; 16] = b"<>|.:-_$&+,;=%~?";

const HTTPS: &str = "https://";
const HTTP: &str = "http://";
const HTTP_TAG: &str = "h:";

/// Characters with structural meaning in the simplified form, and their
/// escapes. `%` is only escaped where it would otherwise read as an escape.
const ESCAPES: [(char, &str); 4] = [('%', "%25"), ('|', "%7C"), ('<', "%3C"), ('>', "%3E")];

#[derive(Debug)]
struct DomainGroup {
    http: bool,
    domain: String,
    /// Path including its leading `/`; empty for a bare domain
    paths: Vec<String>,
}

/// Split a newline or comma separated URL list, dropping blank entries.
pub fn split_link_list(input: &str) -> Vec<String> {
    input
        .split(['\n', '\r', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Factor `urls` into the grouped form. Group order follows first appearance.
pub fn simplify_links<S: AsRef<str>>(urls: &[S]) -> String {
    let mut groups: Vec<DomainGroup> = Vec::new();

    for url in urls {
        let url = url.as_ref().trim();
        if url.is_empty() {
            continue;
        }
        let (http, rest) = if let Some(rest) = url.strip_prefix(HTTPS) {
            (false, rest)
        } else if let Some(rest) = url.strip_prefix(HTTP) {
            (true, rest)
        } else {
            (false, url)
        };
        let rest = escape_reserved(rest);
        let (domain, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));

        match groups.iter_mut().find(|g| g.http == http && g.domain == domain) {
            Some(group) => group.paths.push(path.to_string()),
            None => groups.push(DomainGroup { http, domain: domain.to_string(), paths: vec![path.to_string()] }),
        }
    }

    let mut out = String::new();
    for group in &groups {
        if group.http {
            out.push_str(HTTP_TAG);
        }
        out.push_str(&group.domain);

        let prefix = common_directory_prefix(&group.paths);
        out.push_str(prefix);
        out.push('<');
        let suffixes: Vec<&str> = group.paths.iter().map(|p| &p[prefix.len()..]).collect();
        out.push_str(&suffixes.join("|"));
        out.push('>');
    }
    out
}

/// Longest common prefix of `paths`, cut back to its last `/` (inclusive).
fn common_directory_prefix(paths: &[String]) -> &str {
    let Some((first, rest)) = paths.split_first() else {
        return "";
    };
    let mut len = first.len();
    for path in rest {
        len = first
            .char_indices()
            .zip(path.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(len);
    }
    match first[..len].rfind('/') {
        Some(slash) => &first[..=slash],
        None => "",
    }
}

/// Expand the grouped form back into one absolute URL per suffix.
pub fn desimplify_links(simplified: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut rest = simplified;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>').map(|i| open + i) else {
            break;
        };
        let head = &rest[..open];
        let inner = &rest[open + 1..close];
        rest = &rest[close + 1..];

        let (scheme, head) = match head.strip_prefix(HTTP_TAG) {
            Some(stripped) => (HTTP, stripped),
            None => (HTTPS, head),
        };

        for part in inner.split('|') {
            urls.push(format!("{}{}", scheme, unescape_reserved(&format!("{}{}", head, part))));
        }
    }
    urls
}

fn escape_reserved(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        if c == '%' && escape_at(&text[i..]).is_none() {
            out.push(c);
            continue;
        }
        match ESCAPES.iter().find(|(reserved, _)| *reserved == c) {
            Some((_, code)) => out.push_str(code),
            None => out.push(c),
        }
    }
    out
}

fn unescape_reserved(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        match escape_at(rest) {
            Some((reserved, code)) => {
                out.push(reserved);
                rest = &rest[code.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// Escape sequence starting `text`, if any.
fn escape_at(text: &str) -> Option<(char, &'static str)> {
    ESCAPES.iter().copied().find(|(_, code)| text.starts_with(code))
}

/// Bit-pack a simplified link string.
pub fn compress_link(simplified: &str) -> Result<Vec<u8>> {
    let mut writer = BitWriter::new();
    for c in simplified.chars() {
        if let Some(index) = position(PRIMARY, c) {
            writer.write_bit(false);
            writer.write_bits(index, 6);
        } else if let Some(index) = position(SECONDARY, c) {
            writer.write_bit(true);
            writer.write_bits(index, 4);
        } else {
            return Err(ProtocolError::UnsupportedCharacter(c));
        }
    }
    Ok(writer.finish_packed())
}

/// Inverse of [`compress_link`]. An incomplete trailing symbol is ignored.
pub fn decompress_link(packed: &[u8]) -> String {
    let mut reader = BitReader::from_packed(packed);
    let mut out = String::new();
    while let Some(secondary) = reader.read_bit() {
        let symbol = if secondary {
            reader.read_bits(4).map(|i| SECONDARY[i as usize])
        } else {
            reader.read_bits(6).map(|i| PRIMARY[i as usize])
        };
        match symbol {
            Some(b) => out.push(b as char),
            None => break,
        }
    }
    out
}

fn position(alphabet: &[u8], c: char) -> Option<u32> {
    if !c.is_ascii() {
        return None;
    }
    alphabet.iter().position(|&b| b as char == c).map(|i| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(urls: &[&str]) -> BTreeSet<String> {
        urls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shared_directory_is_factored() {
        let urls = ["cdn.example.com/a/x.jpg", "cdn.example.com/a/y.jpg"];
        assert_eq!(simplify_links(&urls), "cdn.example.com/a/<x.jpg|y.jpg>");
    }

    #[test]
    fn test_bare_domains_and_http_tag() {
        let urls = ["http://plain.org", "https://secure.org/"];
        assert_eq!(simplify_links(&urls), "h:plain.org<>secure.org/<>");
        assert_eq!(
            desimplify_links("h:plain.org<>secure.org/<>"),
            vec!["http://plain.org", "https://secure.org/"]
        );
    }

    #[test]
    fn test_no_common_directory() {
        let urls = ["https://x.io/one.png", "https://x.io/two.png"];
        assert_eq!(simplify_links(&urls), "x.io/<one.png|two.png>");
    }

    #[test]
    fn test_prefix_cut_at_last_slash() {
        let urls = ["d.com/img/cat1.png", "d.com/img/cat2.png"];
        // common prefix "img/cat" is cut back to "img/"
        assert_eq!(simplify_links(&urls), "d.com/img/<cat1.png|cat2.png>");
    }

    #[test]
    fn test_desimplify_inverts_simplify() {
        let urls = [
            "https://cdn.example.com/a/x.jpg",
            "https://cdn.example.com/a/y.jpg",
            "http://old.site.net/pics/2020/p.gif",
            "https://other.org",
            "https://other.org/",
            "https://other.org/deep/dir/",
            "http://cdn.example.com/a/x.jpg",
        ];
        let simplified = simplify_links(&urls);
        let restored: BTreeSet<String> = desimplify_links(&simplified).into_iter().collect();
        assert_eq!(restored, set(&urls));
    }

    #[test]
    fn test_group_syntax_inside_urls_is_escaped() {
        assert_eq!(simplify_links(&["x.io/a|b"]), "x.io/<a%7Cb>");

        let urls = [
            "https://wiki.example.org/a|b",
            "https://wiki.example.org/<tag>",
            "https://w.io/%7C%20",
            "https://w.io/100%",
        ];
        let simplified = simplify_links(&urls);
        let restored: BTreeSet<String> = desimplify_links(&simplified).into_iter().collect();
        assert_eq!(restored, set(&urls));
        assert_eq!(decompress_link(&compress_link(&simplified).unwrap()), simplified);
    }

    #[test]
    fn test_missing_scheme_defaults_to_https() {
        let simplified = simplify_links(&["example.com/a/b.png"]);
        assert_eq!(desimplify_links(&simplified), vec!["https://example.com/a/b.png"]);
    }

    #[test]
    fn test_link_codec_roundtrip() {
        let simplified = "h:cdn.example.com/a/<x.jpg|y_2.jpg>i.io<~p?q=1&r=%20>";
        let packed = compress_link(simplified).unwrap();
        assert_eq!(decompress_link(&packed), simplified);
    }

    #[test]
    fn test_link_codec_bit_widths() {
        // 'a' is primary: 7 bits, '<' is secondary: 5 bits
        let packed = compress_link("a<").unwrap();
        assert_eq!(packed.len(), 3);
        assert_eq!(packed[2], 4);
        assert_eq!(packed[0], 0b0000_0001);
    }

    #[test]
    fn test_link_codec_rejects_unsupported() {
        assert_eq!(compress_link("a b"), Err(ProtocolError::UnsupportedCharacter(' ')));
    }

    #[test]
    fn test_split_link_list() {
        let list = split_link_list("a.com/x, b.com/y\n\n c.com ");
        assert_eq!(list, vec!["a.com/x", "b.com/y", "c.com"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(simplify_links::<&str>(&[]), "");
        assert!(desimplify_links("").is_empty());
        assert!(compress_link("").unwrap().is_empty());
        assert_eq!(decompress_link(&[]), "");
    }
}
