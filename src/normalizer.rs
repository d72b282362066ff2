//! Storage-format HTML cleaning for embedding and prompting.

use ego_tree::NodeRef;
use scraper::{Html, Node};

/// Elements whose subtrees never contribute text.
const ALWAYS_SKIPPED: &[&str] = &["script", "style", "head", "noscript", "template"];

/// Cleaning knobs.
///
/// The default is the aggressive policy: tables are dropped along with markup,
/// since table cells embed poorly as flowing text. Link hrefs and image
/// sources are always discarded; anchor text is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanOptions {
    /// Keep the text inside `<table>` subtrees instead of dropping it.
    pub keep_tables: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self { keep_tables: false }
    }
}

/// Strips markup from Confluence storage-format HTML, returning plain text
/// with whitespace runs collapsed to single spaces.
pub fn clean_html(html: &str, options: &CleanOptions) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::with_capacity(html.len() / 2);
    collect_text(document.tree.root(), options, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(node: NodeRef<'_, Node>, options: &CleanOptions, out: &mut String) {
    if let Node::Element(element) = node.value() {
        let name = element.name();
        if ALWAYS_SKIPPED.contains(&name) {
            return;
        }
        if name == "table" && !options.keep_tables {
            return;
        }
    }
    if let Node::Text(text) = node.value() {
        out.push_str(&text);
        out.push(' ');
        return;
    }
    for child in node.children() {
        collect_text(child, options, out);
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for token in input.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(token);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_collapses_whitespace() {
        let html = "<p>Release   notes</p>\n<p>for <b>version</b>\n2</p>";
        assert_eq!(
            clean_html(html, &CleanOptions::default()),
            "Release notes for version 2"
        );
    }

    #[test]
    fn drops_scripts_and_styles() {
        let html = "<style>p { color: red; }</style><script>alert(1)</script><p>Body</p>";
        assert_eq!(clean_html(html, &CleanOptions::default()), "Body");
    }

    #[test]
    fn keeps_anchor_text_without_href() {
        let html = r#"<p>See <a href="https://internal/page">the runbook</a> first.</p>"#;
        assert_eq!(
            clean_html(html, &CleanOptions::default()),
            "See the runbook first."
        );
    }

    #[test]
    fn table_policy_is_configurable() {
        let html = "<p>Intro</p><table><tr><td>cell</td></tr></table><p>Outro</p>";
        assert_eq!(clean_html(html, &CleanOptions::default()), "Intro Outro");
        let keep = CleanOptions { keep_tables: true };
        assert_eq!(clean_html(html, &keep), "Intro cell Outro");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(clean_html("", &CleanOptions::default()), "");
        assert_eq!(clean_html("   \n\t ", &CleanOptions::default()), "");
    }
}
