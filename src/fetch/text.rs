use scraper::{Html, Node};

/// Elements whose text never reaches the reader.
const HIDDEN: &[&str] = &["script", "style", "noscript", "template"];

/// Visible text of a document: trimmed text nodes joined by single spaces.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();
    for node in doc.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        let hidden = node.ancestors().any(|a| {
            matches!(a.value(), Node::Element(el) if HIDDEN.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        parts.push(trimmed);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_nodes() {
        let html = "<html><head><title>Bank</title></head><body><h1> Login </h1><p>now\n</p></body></html>";
        assert_eq!(visible_text(html), "Bank Login now");
    }

    #[test]
    fn skips_scripts_and_styles() {
        let html = "<html><head><style>p{color:red}</style></head><body><script>var x = 1;</script><noscript>enable js</noscript></body></html>";
        assert_eq!(visible_text(html), "");
    }

    #[test]
    fn empty_document() {
        assert_eq!(visible_text(""), "");
    }
}
