//! Best-effort tag extraction for UPnP documents.
//!
//! Router description and SOAP response documents are frequently
//! malformed, so this is a tolerant scanner rather than an XML parser:
//! anything that does not look like the wanted element is skipped and
//! scanning continues.

/// Find the next `<tag ...>content</tag>` element at or after `from`.
///
/// Returns the raw content and the position just past the closing tag.
pub(crate) fn next_element<'a>(xml: &'a str, tag: &str, from: usize) -> Option<(&'a str, usize)> {
    let open = format!("<{tag}");
    let close = format!("</{tag}");

    let mut search = from;
    loop {
        let start = xml[search..].find(&open)? + search;
        let after_name = start + open.len();
        let rest = &xml[after_name..];

        // the match must be the whole tag name, not a prefix of a longer one
        if !rest.starts_with('>') && !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
            search = after_name;
            continue;
        }

        let Some(gt) = rest.find('>') else {
            return None;
        };
        let content_start = after_name + gt + 1;

        let close_rel = xml[content_start..].find(&close)?;
        let content_end = content_start + close_rel;
        let after_close = xml[content_end..].find('>')? + content_end + 1;

        return Some((&xml[content_start..content_end], after_close));
    }
}

/// Trimmed text content of the first `tag` element, if any.
pub(crate) fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    next_element(xml, tag, 0).map(|(content, _)| content.trim())
}

/// Iterate over every `tag` element in document order.
pub(crate) fn elements<'a>(xml: &'a str, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let (content, next) = next_element(xml, tag, pos)?;
        pos = next;
        Some(content)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_element() {
        assert_eq!(element_text("<a><b> hello </b></a>", "b"), Some("hello"));
    }

    #[test]
    fn tag_name_is_not_a_prefix_match() {
        // <serviceType> must not satisfy a search for <service>
        let xml = "<serviceType>urn:x</serviceType><service><id>1</id></service>";
        assert_eq!(element_text(xml, "service"), Some("<id>1</id>"));
    }

    #[test]
    fn tolerates_whitespace_before_closing_bracket() {
        assert_eq!(element_text("<b >x</b >", "b"), Some("x"));
    }

    #[test]
    fn missing_element_is_none() {
        assert_eq!(element_text("<a>x</a>", "b"), None);
        assert_eq!(element_text("<b>never closed", "b"), None);
    }

    #[test]
    fn iterates_all_blocks() {
        let xml = "<s>one</s> junk <s>two</s><s>three</s>";
        let all: Vec<_> = elements(xml, "s").collect();
        assert_eq!(all, ["one", "two", "three"]);
    }
}
