//! Cache-state link recoloring: every `<a ` anchor tag whose `href`
//! attribute names an `http`/`https` resource gets a `style="color:..."`
//! attribute inserted immediately after the `<a ` token, green if the
//! target is a perfect key prefix match for something currently live in
//! the cache, red otherwise.
//!
//! Grounded on `examples/original_source/proxy/src/http.c`'s `color_links`,
//! `perfectKeyPrefix`, and `foundKey`. The original compares the href
//! directly against scheme-qualified cache keys (`"http://host/path"`);
//! this cache stores keys as `host||path` with no scheme, so matching here
//! strips the href's scheme before applying the same prefix rule: lengths
//! ordered, equal from the first `//` onward, and the candidate key may
//! carry a `:PORT` suffix the href omitted.

const GREEN_STYLE: &str = "style=\"color:#00FF00;\" ";
const RED_STYLE: &str = "style=\"color:#FF0000;\" ";
const ANCHOR_OPEN: &str = "<a ";

/// Rewrites every `<a ` anchor tag in `html` whose `href` names an
/// `http`/`https` resource, inserting a color-coded `style` attribute right
/// after the `<a ` token. Tags without an `href="http…"` attribute are left
/// untouched.
pub fn recolor_links(html: &str, live_keys: &[&str]) -> String {
    let mut out = String::with_capacity(html.len() + html.len() / 8);
    let mut rest = html;

    while let Some(anchor_at) = find_case_insensitive(rest, ANCHOR_OPEN) {
        let insert_at = anchor_at + ANCHOR_OPEN.len();
        out.push_str(&rest[..insert_at]);

        match extract_href(&rest[insert_at..]) {
            Some(href) if is_perfect_key_match(href, live_keys) => out.push_str(GREEN_STYLE),
            Some(_) => out.push_str(RED_STYLE),
            None => {}
        }

        rest = &rest[insert_at..];
    }
    out.push_str(rest);

    out
}

/// Finds the first quoted `href="..."` value within `tag_rest` (text
/// starting right after the `<a ` token, running to end of input). Returns
/// `None` if no `href` attribute is present before the tag closes.
fn extract_href(tag_rest: &str) -> Option<&str> {
    let tag_end = tag_rest.find('>').unwrap_or(tag_rest.len());
    let attrs = &tag_rest[..tag_end];
    let href_at = find_case_insensitive(attrs, "href=\"")?;
    let value_start = href_at + "href=\"".len();
    let value_end = value_start + attrs[value_start..].find('"')?;
    Some(&attrs[value_start..value_end])
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_lower = haystack.to_ascii_lowercase();
    let needle_lower = needle.to_ascii_lowercase();
    haystack_lower.find(&needle_lower)
}

/// `true` if `href` names an `http`/`https` resource whose scheme-stripped
/// `host[:port]/path` is a perfect key prefix of some entry in `live_keys`
/// (each stored as `host||path`, no scheme, no port unless the request
/// target carried one).
fn is_perfect_key_match(href: &str, live_keys: &[&str]) -> bool {
    let Some(target) = strip_scheme(href) else { return false };
    live_keys.iter().any(|&key| perfect_prefix(&target, key))
}

/// Strips a leading `http://` or `https://`, leaving `host[:port]/path`.
fn strip_scheme(href: &str) -> Option<String> {
    let scheme_end = href.find("://")?;
    let scheme = &href[..scheme_end];
    if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
        Some(href[scheme_end + 3..].to_string())
    } else {
        None
    }
}

/// Port-qualified prefix rule, applied to the
/// scheme-stripped target `t` against a stored `host||path` key `k`:
/// `t` must be no longer than `k`, match it byte-for-byte over its full
/// length, and `k` may continue only with `:DIGIT+` past that point (an
/// explicit port `t` omitted) or end exactly there.
fn perfect_prefix(t: &str, k: &str) -> bool {
    if t.len() > k.len() {
        return false;
    }
    if !k.as_bytes().starts_with(t.as_bytes()) {
        return false;
    }
    let rest = &k[t.len()..];
    rest.is_empty() || (rest.starts_with(':') && rest[1..].chars().next().is_some_and(|c| c.is_ascii_digit()))
}
