//! Minimal XML tree used by the MPD and PSSH readers. quick-xml is a pull
//! parser; the manifest walkers want a document they can query.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{ManifestError, ManifestResult};

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    /// Local name, namespace prefix stripped.
    pub name: String,
    /// Attributes with their qualified names preserved.
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name || local_name(key) == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn first_child<'a>(&'a self, name: &'a str) -> Option<&'a XmlNode> {
        self.children_named(name).next()
    }

    pub fn descendants<'a>(&'a self, name: &'a str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    pub fn find_all<'a>(&'a self, name: &'a str) -> Vec<&'a XmlNode> {
        let mut out = Vec::new();
        self.descendants(name, &mut out);
        out
    }
}

pub fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

pub fn parse_document(content: &str) -> ManifestResult<XmlNode> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader
            .read_event()
            .map_err(|err| ManifestError::Xml(err.to_string()))?
        {
            Event::Start(start) => {
                let node = node_from_start(&reader, &start)?;
                stack.push(node);
            }
            Event::Empty(start) => {
                let node = node_from_start(&reader, &start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = text
                        .unescape()
                        .map_err(|err| ManifestError::Xml(err.to_string()))?;
                    top.text.push_str(decoded.trim());
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ManifestError::Xml("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| ManifestError::Xml("document has no root element".into()))
}

fn node_from_start<B>(
    reader: &Reader<B>,
    start: &quick_xml::events::BytesStart<'_>,
) -> ManifestResult<XmlNode> {
    let qualified = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let mut node = XmlNode {
        name: local_name(&qualified).to_string(),
        ..XmlNode::default()
    };
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| ManifestError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).to_string();
        let value = attribute
            .decode_and_unescape_value(reader)
            .map_err(|err| ManifestError::Xml(err.to_string()))?
            .to_string();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_namespaced_document() {
        let doc = parse_document(
            r#"<MPD xmlns:cenc="urn:mpeg:cenc:2013">
                 <Period>
                   <AdaptationSet mimeType="video/mp4">
                     <ContentProtection cenc:default_KID="aa-bb"/>
                     <cenc:pssh>AAAA</cenc:pssh>
                   </AdaptationSet>
                 </Period>
               </MPD>"#,
        )
        .unwrap();
        assert_eq!(doc.name, "MPD");
        let sets = doc.find_all("AdaptationSet");
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].attr("mimeType"), Some("video/mp4"));
        let protection = sets[0].first_child("ContentProtection").unwrap();
        assert_eq!(protection.attr("cenc:default_KID"), Some("aa-bb"));
        assert_eq!(protection.attr("default_KID"), Some("aa-bb"));
        assert_eq!(sets[0].first_child("pssh").unwrap().text, "AAAA");
    }
}
