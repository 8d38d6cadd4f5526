//! Rewrites generated DocFX HTML into Confluence storage-format markup:
//! cross-reference anchors become view-page links, and highlighted code
//! blocks become the native `code` macro.
//!
//! `scraper` trees are immutable, so both rewrites happen while the parsed
//! fragment is serialized back out. Macro markup is emitted directly by the
//! serializer instead of being parsed from a template string, which is also
//! why no `xmlns:ac` declaration ever appears in the output.

use std::collections::BTreeMap;

use ego_tree::NodeRef;
use scraper::node::{Element, Node};
use scraper::{ElementRef, Html};

pub const VIEW_PAGE_URL: &str = "/pages/viewpage.action?pageId=";

const XREF_CLASS: &str = "xref";
const CODE_WRAPPER_CLASS: &str = "codewrapper";
const LANGUAGE_CLASS_PREFIX: &str = "lang-";

/// DocFX language names the Confluence code macro spells differently.
/// Anything not listed passes through unchanged.
const LANGUAGE_ALIASES: &[(&str, &str)] = &[("csharp", "c#")];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone)]
pub struct TransformedContent {
    pub body: String,
    /// Unresolved cross-reference targets, one entry per anchor left as-is.
    pub warnings: Vec<String>,
}

/// Transform one page's HTML. `base_dir` is the page's directory relative to
/// the site root (the root itself is the empty string, not a separator); it
/// anchors relative xref targets so they can be looked up in `hrefs`.
pub fn transform_content(
    base_dir: &str,
    content: &str,
    hrefs: &BTreeMap<String, String>,
) -> TransformedContent {
    let fragment = Html::parse_fragment(content);
    let mut context = TransformContext {
        base_dir,
        hrefs,
        warnings: Vec::new(),
    };

    let mut body = String::new();
    for child in fragment.root_element().children() {
        serialize_node(child, &mut context, &mut body);
    }

    TransformedContent {
        body,
        warnings: context.warnings,
    }
}

pub fn map_language(language: &str) -> &str {
    LANGUAGE_ALIASES
        .iter()
        .find(|(from, _)| *from == language)
        .map(|(_, to)| *to)
        .unwrap_or(language)
}

/// Path component of an href, without query or fragment.
pub fn href_path(href: &str) -> &str {
    let end = href.find(['?', '#']).unwrap_or(href.len());
    &href[..end]
}

struct TransformContext<'a> {
    base_dir: &'a str,
    hrefs: &'a BTreeMap<String, String>,
    warnings: Vec<String>,
}

impl TransformContext<'_> {
    /// Root-relative lookup key for an xref target, normalized the same way
    /// the mapping index normalizes its href keys.
    fn lookup_key(&self, path: &str) -> String {
        let joined = format!("{}/{}", self.base_dir, path.trim_start_matches('/'));
        joined.trim_start_matches('/').to_string()
    }

    /// Rewritten href for a resolvable xref anchor, or `None` (plus a
    /// warning) when the target is unknown.
    fn rewrite_xref(&mut self, href: &str) -> Option<String> {
        let path = href_path(href);
        let key = self.lookup_key(path);
        if !path.is_empty()
            && let Some(page_id) = self.hrefs.get(&key)
        {
            return Some(href.replacen(path, &format!("{VIEW_PAGE_URL}{page_id}"), 1));
        }
        self.warnings
            .push(format!("no mapping for xref link '{key}'"));
        None
    }
}

fn serialize_node(node: NodeRef<'_, Node>, context: &mut TransformContext<'_>, out: &mut String) {
    match node.value() {
        Node::Text(text) => push_escaped_text(&text.text, out),
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(&comment.comment);
            out.push_str("-->");
        }
        Node::Element(element) => serialize_element(node, &element, context, out),
        _ => {
            for child in node.children() {
                serialize_node(child, context, out);
            }
        }
    }
}

fn serialize_element(
    node: NodeRef<'_, Node>,
    element: &Element,
    context: &mut TransformContext<'_>,
    out: &mut String,
) {
    let name = element.name();

    let mut href_override = None;
    if name == "a"
        && has_class(element, XREF_CLASS)
        && let Some(href) = element.attr("href")
    {
        href_override = context.rewrite_xref(href);
    }

    out.push('<');
    out.push_str(name);
    for (attr_name, attr_value) in element.attrs() {
        let value = if attr_name == "href" {
            href_override.as_deref().unwrap_or(attr_value)
        } else {
            attr_value
        };
        out.push(' ');
        out.push_str(attr_name);
        out.push_str("=\"");
        push_escaped_attr(value, out);
        out.push('"');
    }

    if VOID_ELEMENTS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');

    if name == "div"
        && has_class(element, CODE_WRAPPER_CLASS)
        && let Some(markup) = code_macro_markup(node)
    {
        // The macro replaces the wrapper's entire child content.
        out.push_str(&markup);
        out.push_str("</");
        out.push_str(name);
        out.push('>');
        return;
    }

    let raw_text = matches!(name, "script" | "style");
    for child in node.children() {
        if raw_text {
            if let Node::Text(text) = child.value() {
                out.push_str(&text.text);
            }
        } else {
            serialize_node(child, context, out);
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Confluence `code` macro markup for a code wrapper, or `None` when the
/// wrapper has no `<pre><code>` pair or the code block carries no language
/// class (those blocks keep their original markup).
fn code_macro_markup(wrapper: NodeRef<'_, Node>) -> Option<String> {
    let code = first_pre_code(wrapper)?;
    let language = code
        .value()
        .classes()
        .find_map(|class| class.strip_prefix(LANGUAGE_CLASS_PREFIX))?;
    let language = map_language(language);
    let source = code.text().collect::<String>();

    let mut markup = String::new();
    markup.push_str("<ac:structured-macro ac:name=\"code\" ac:schema-version=\"1\">");
    markup.push_str("<ac:parameter ac:name=\"language\">");
    push_escaped_text(language, &mut markup);
    markup.push_str("</ac:parameter><ac:plain-text-body>");
    push_cdata(&source, &mut markup);
    markup.push_str("</ac:plain-text-body></ac:structured-macro>");
    Some(markup)
}

fn first_pre_code(wrapper: NodeRef<'_, Node>) -> Option<ElementRef<'_>> {
    for descendant in wrapper.descendants().skip(1) {
        let Some(code) = ElementRef::wrap(descendant) else {
            continue;
        };
        if code.value().name() != "code" {
            continue;
        }
        let mut ancestor = descendant.parent();
        while let Some(parent) = ancestor {
            if parent.id() == wrapper.id() {
                break;
            }
            if let Some(element) = ElementRef::wrap(parent)
                && element.value().name() == "pre"
            {
                return Some(code);
            }
            ancestor = parent.parent();
        }
    }
    None
}

fn has_class(element: &Element, class: &str) -> bool {
    element.classes().any(|candidate| candidate == class)
}

/// The macro body must carry the source text unescaped; CDATA keeps angle
/// brackets and ampersands intact. A literal `]]>` in the source would end
/// the section early, so it is split across two sections.
fn push_cdata(source: &str, out: &mut String) {
    out.push_str("<![CDATA[");
    out.push_str(&source.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
}

fn push_escaped_text(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn push_escaped_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}
