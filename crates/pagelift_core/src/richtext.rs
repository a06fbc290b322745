use anyhow::Result;

/// A stored image referenced from rich text.
#[derive(Debug, Clone)]
pub struct EmbedImage {
    pub id: i64,
    pub title: String,
}

/// Replace every `<img>` tag in `html` whose `src` the resolver maps to a
/// stored image with an `<embed .../>` marker. Tags with no `src`, and tags
/// the resolver declines (`Ok(None)`), pass through byte-for-byte, as does
/// everything outside `<img>` tags. Resolver errors abort the rewrite.
pub fn rewrite_body_images<F>(html: &str, mut resolve: F) -> Result<String>
where
    F: FnMut(&str) -> Result<Option<EmbedImage>>,
{
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(offset) = find_img_tag_start(rest) {
        let (before, tag_onward) = rest.split_at(offset);
        out.push_str(before);

        let Some(tag_len) = tag_onward.find('>').map(|gt| gt + 1) else {
            // unterminated tag: leave the tail untouched
            rest = tag_onward;
            break;
        };
        let (tag, after) = tag_onward.split_at(tag_len);

        match extract_src(tag) {
            Some(src) => match resolve(src)? {
                Some(image) => out.push_str(&embed_marker(&image)),
                None => out.push_str(tag),
            },
            None => out.push_str(tag),
        }
        rest = after;
    }

    out.push_str(rest);
    Ok(out)
}

fn embed_marker(image: &EmbedImage) -> String {
    let title = escape_attr(&image.title);
    format!(
        "<embed alt=\"{title}\" caption=\"{title}\" embedtype=\"image\" \
         format=\"fullwidth\" id=\"{id}\"/>",
        id = image.id
    )
}

/// Byte offset of the next `<img` opening (any case) followed by a tag
/// delimiter, so `<imgx>` and the like are not matched.
fn find_img_tag_start(html: &str) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1..i + 4].eq_ignore_ascii_case(b"img") {
            match bytes.get(i + 4) {
                None | Some(b' ' | b'\t' | b'\n' | b'\r' | b'/' | b'>') => return Some(i),
                Some(_) => {}
            }
        }
        i += 1;
    }
    None
}

/// The `src` attribute value of an `<img>` tag, if present. Quoted and
/// unquoted forms are both accepted; legacy markup uses both.
fn extract_src(tag: &str) -> Option<&str> {
    let bytes = tag.as_bytes();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let preceded_by_space = i > 0 && bytes[i - 1].is_ascii_whitespace();
        if preceded_by_space && bytes[i..i + 3].eq_ignore_ascii_case(b"src") {
            let mut j = i + 3;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if bytes.get(j) != Some(&b'=') {
                i += 1;
                continue;
            }
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            let quote = *bytes.get(j)?;
            if quote == b'"' || quote == b'\'' {
                let value_start = j + 1;
                let value_len = tag[value_start..].find(quote as char)?;
                return Some(&tag[value_start..value_start + value_len]);
            }
            // unquoted value: runs to the next whitespace or the tag close
            let value_start = j;
            let mut end = j;
            while end < bytes.len() && !bytes[end].is_ascii_whitespace() && bytes[end] != b'>' {
                end += 1;
            }
            if end == value_start {
                return None;
            }
            return Some(&tag[value_start..end]);
        }
        i += 1;
    }
    None
}

fn escape_attr(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{EmbedImage, extract_src, rewrite_body_images};

    fn fixed_image(id: i64, title: &str) -> EmbedImage {
        EmbedImage {
            id,
            title: title.to_string(),
        }
    }

    #[test]
    fn resolved_images_become_embed_markers() {
        let html = "<p>Intro</p><img src=\"http://x/pic.jpg\" alt=\"old\"><p>Outro</p>";
        let rewritten = rewrite_body_images(html, |src| {
            assert_eq!(src, "http://x/pic.jpg");
            Ok(Some(fixed_image(7, "pic.jpg")))
        })
        .expect("rewrite");
        assert_eq!(
            rewritten,
            "<p>Intro</p><embed alt=\"pic.jpg\" caption=\"pic.jpg\" \
             embedtype=\"image\" format=\"fullwidth\" id=\"7\"/><p>Outro</p>"
        );
    }

    #[test]
    fn unresolved_and_srcless_tags_pass_through_verbatim() {
        let html = "<img class=\"x\"> and <img src=\"http://x/gone.png\"/> stay";
        let rewritten = rewrite_body_images(html, |_| Ok(None)).expect("rewrite");
        assert_eq!(rewritten, html);
    }

    #[test]
    fn multiple_images_are_each_resolved() {
        let html = "<img src=\"a\"><img src=\"b\">";
        let mut seen = Vec::new();
        let rewritten = rewrite_body_images(html, |src| {
            seen.push(src.to_string());
            Ok(Some(fixed_image(seen.len() as i64, src)))
        })
        .expect("rewrite");
        assert_eq!(seen, vec!["a", "b"]);
        assert!(rewritten.contains("id=\"1\""));
        assert!(rewritten.contains("id=\"2\""));
    }

    #[test]
    fn tag_matching_is_case_insensitive_but_exact() {
        let html = "<IMG SRC='http://x/p.gif'> <imgx src=\"no\">";
        let rewritten =
            rewrite_body_images(html, |_| Ok(Some(fixed_image(3, "p.gif")))).expect("rewrite");
        assert!(rewritten.contains("id=\"3\""));
        assert!(rewritten.contains("<imgx src=\"no\">"));
    }

    #[test]
    fn titles_are_escaped_in_markers() {
        let html = "<img src=\"a\">";
        let rewritten = rewrite_body_images(html, |_| {
            Ok(Some(fixed_image(1, "fish & \"chips\"")))
        })
        .expect("rewrite");
        assert!(rewritten.contains("alt=\"fish &amp; &quot;chips&quot;\""));
    }

    #[test]
    fn resolver_errors_abort_the_rewrite() {
        let html = "<img src=\"a\">";
        let error = rewrite_body_images(html, |_| Err(anyhow!("boom"))).expect_err("must fail");
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn unterminated_tags_are_left_alone() {
        let html = "<p>text</p><img src=\"a\"";
        let rewritten = rewrite_body_images(html, |_| Ok(Some(fixed_image(1, "a")))).expect("ok");
        assert_eq!(rewritten, html);
    }

    #[test]
    fn src_extraction_requires_a_real_attribute() {
        assert_eq!(extract_src("<img src=\"a\">"), Some("a"));
        assert_eq!(extract_src("<img data-src=\"a\">"), None);
        assert_eq!(extract_src("<img src = 'a'>"), Some("a"));
        assert_eq!(extract_src("<img>"), None);
        assert_eq!(extract_src("<img src=>"), None);
    }

    #[test]
    fn unquoted_src_values_are_accepted() {
        assert_eq!(
            extract_src("<img src=http://x/pic.jpg alt=old>"),
            Some("http://x/pic.jpg")
        );
        assert_eq!(extract_src("<img src=pic.jpg>"), Some("pic.jpg"));

        let html = "<p>Intro</p><img src=http://x/pic.jpg><p>Outro</p>";
        let rewritten = rewrite_body_images(html, |src| {
            assert_eq!(src, "http://x/pic.jpg");
            Ok(Some(fixed_image(5, "pic.jpg")))
        })
        .expect("rewrite");
        assert!(rewritten.contains("id=\"5\""));
        assert!(!rewritten.contains("<img"));
    }
}
