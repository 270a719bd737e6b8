//! Minimal XML element tree with a deterministic pretty serializer.
//!
//! The manifest document schema is fixed and small, so emission is done by
//! hand: attributes render in insertion order, children in insertion order,
//! two-space indentation, one element per line. There is no parsing here;
//! the document is write-only output for the engine's `build` command.

use std::fmt::Write;

/// One element in the output document.
#[derive(Debug, Clone)]
pub struct Element {
    name: &'static str,
    attributes: Vec<(&'static str, String)>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.attributes.push((name, value.into()));
        self
    }

    /// Adds the attribute only when `value` is present.
    pub fn attr_opt(self, name: &'static str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    pub fn child(&mut self, child: Element) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Renders the element as a complete document with an XML declaration.
    pub fn to_document(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push('<');
        out.push_str(self.name);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", name, escape(value));
        }
        if self.children.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for child in &self.children {
            child.render(out, depth + 1);
        }
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = writeln!(out, "</{}>", self.name);
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_elements_with_indentation() {
        let mut root = Element::new("Repository");
        let mut features = Element::new("Features");
        features.child(Element::new("Feature").attr("Id", "F1"));
        root.child(features);

        let doc = root.to_document();
        assert_eq!(
            doc,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Repository>\n\
             \x20\x20<Features>\n\
             \x20\x20\x20\x20<Feature Id=\"F1\"/>\n\
             \x20\x20</Features>\n\
             </Repository>\n"
        );
    }

    #[test]
    fn escapes_attribute_values() {
        let element = Element::new("File").attr("Source", "a<b>&\"c\"");
        let doc = element.to_document();
        assert!(doc.contains("Source=\"a&lt;b&gt;&amp;&quot;c&quot;\""));
    }

    #[test]
    fn attr_opt_skips_missing_values() {
        let element = Element::new("Node")
            .attr("Name", "n")
            .attr_opt("Description", None::<String>);
        assert_eq!(
            element.to_document(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Node Name=\"n\"/>\n"
        );
    }
}
