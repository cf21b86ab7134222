//! Reader for the JUnit-style result document written by the verification tool.
//!
//! Only the subset of XML the tool emits is understood: declarations, comments,
//! CDATA sections, elements with quoted attributes, and character data using the
//! predefined and numeric entities.

use std::borrow::Cow;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed result document near '{near}': {msg}")]
    Syntax { msg: String, near: String },
    #[error("Attribute {element}.{attr} has invalid value '{value}'")]
    BadAttribute {
        element: &'static str,
        attr: &'static str,
        value: String,
    },
}

/// One lexical piece of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
    Open {
        name: &'a str,
        attrs: Vec<(&'a str, &'a str)>,
        empty: bool,
    },
    Close(&'a str),
    Text(&'a str),
    CData(&'a str),
    /// Declarations, processing instructions, comments, doctype.
    Other,
}

mod grammar {
    use super::Node;
    use crate::prelude::*;
    use combine::parser::char::spaces;
    use combine::parser::range::{recognize, take_until_range};

    p! {
        name() -> &'a str, {
            recognize(skip_many1(satisfy(|c: char| c.is_alphanumeric() || "_-.:".contains(c))))
        }
    }

    p! {
        quoted() -> &'a str, {
            between(char('"'), char('"'), recognize(skip_many(none_of("\"".chars()))))
                .or(between(char('\''), char('\''), recognize(skip_many(none_of("'".chars())))))
        }
    }

    p! {
        attribute() -> (&'a str, &'a str), {
            name().skip(spaces()).skip(char('=')).skip(spaces()).and(quoted())
        }
    }

    p! {
        open_tag() -> Node<'a>, {
            (
                char('<').with(name()),
                many::<Vec<_>, _, _>(attempt(spaces().with(attribute()))),
                spaces().with(optional(char('/'))).skip(char('>')),
            )
                .map(|(name, attrs, slash)| Node::Open { name, attrs, empty: slash.is_some() })
        }
    }

    p! {
        close_tag() -> Node<'a>, {
            string("</").with(name()).skip(spaces()).skip(char('>')).map(Node::Close)
        }
    }

    p! {
        declaration() -> Node<'a>, {
            string("<?").with(take_until_range("?>")).skip(string("?>")).map(|_| Node::Other)
        }
    }

    p! {
        comment() -> Node<'a>, {
            string("<!--").with(take_until_range("-->")).skip(string("-->")).map(|_| Node::Other)
        }
    }

    p! {
        cdata() -> Node<'a>, {
            string("<![CDATA[").with(take_until_range("]]>")).skip(string("]]>")).map(Node::CData)
        }
    }

    p! {
        doctype() -> Node<'a>, {
            string("<!").with(take_until_range(">")).skip(char('>')).map(|_| Node::Other)
        }
    }

    p! {
        text() -> Node<'a>, {
            recognize(skip_many1(none_of("<".chars()))).map(Node::Text)
        }
    }

    p! {
        node() -> Node<'a>, {
            choice((
                attempt(declaration()),
                attempt(comment()),
                attempt(cdata()),
                attempt(doctype()),
                attempt(close_tag()),
                open_tag(),
                text(),
            ))
        }
    }

    p! {
        document() -> Vec<Node<'a>>, {
            many(node()).skip(eof())
        }
    }

    #[cfg(test)]
    mod test {
        use super::super::Node;
        use combine::EasyParser;

        #[test]
        fn test_open_tag() {
            assert_eq!(
                Node::Open {
                    name: "testcase",
                    attrs: vec![("name", "demo"), ("time", "3")],
                    empty: true
                },
                super::open_tag()
                    .easy_parse("<testcase name=\"demo\" time='3' />")
                    .unwrap()
                    .0
            );
            assert_eq!(
                Node::Open {
                    name: "system-out",
                    attrs: vec![],
                    empty: false
                },
                super::open_tag().easy_parse("<system-out>").unwrap().0
            );
        }

        #[test]
        fn test_node_kinds() {
            assert_eq!(Node::Close("a"), super::node().easy_parse("</a >").unwrap().0);
            assert_eq!(Node::Other, super::node().easy_parse("<!-- x -->").unwrap().0);
            assert_eq!(Node::Other, super::node().easy_parse("<?xml version=\"1.0\"?>").unwrap().0);
            assert_eq!(Node::CData("a<b"), super::node().easy_parse("<![CDATA[a<b]]>").unwrap().0);
            assert_eq!(Node::Text("x y"), super::node().easy_parse("x y<").unwrap().0);
        }
    }
}

/// Split `text` into a flat list of nodes.
pub fn parse(text: &str) -> Result<Vec<Node<'_>>, Error> {
    use combine::EasyParser;
    grammar::document()
        .easy_parse(text)
        .map(|(nodes, _remainder)| nodes)
        .map_err(|e| {
            let pos = e.position.translate_position(text);
            let near: String = text[pos..].chars().take(32).collect();
            // combine's errors borrow the input, so stringify them here:
            Error::Syntax {
                msg: format!("{}", e),
                near,
            }
        })
}

/// The outcome of the test case in a result document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Elapsed seconds, if recorded.
    pub time: Option<u32>,
    /// Outcome label (`PASS`, `FAIL`, ...), if recorded.
    pub status: Option<String>,
}

/// The parts of a result document the status model cares about.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultDocument {
    /// `errors` attribute of the first test suite.
    pub errors: u32,
    /// `failures` attribute of the first test suite.
    pub failures: u32,
    /// First test case, if any.
    pub testcase: Option<TestCase>,
    /// Text of the first `system-out` element, if any.
    pub system_out: Option<String>,
}

impl ResultDocument {
    /// Parse `text` and pull out the summary, result and output-capture records.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let nodes = parse(text)?;

        let mut doc = Self::default();
        let mut seen_suite = false;
        let mut capturing = false;

        for node in nodes {
            match node {
                Node::Open { name, attrs, empty } => match name {
                    "testsuite" if !seen_suite => {
                        seen_suite = true;
                        doc.errors = count_attr("testsuite", "errors", &attrs)?;
                        doc.failures = count_attr("testsuite", "failures", &attrs)?;
                    }
                    "testcase" if doc.testcase.is_none() => {
                        doc.testcase = Some(TestCase {
                            time: time_attr(&attrs)?,
                            status: attr(&attrs, "status").map(|v| unescape(v).into_owned()),
                        });
                    }
                    "system-out" if doc.system_out.is_none() => {
                        doc.system_out = Some(String::new());
                        capturing = !empty;
                    }
                    _ => {}
                },
                Node::Close("system-out") => capturing = false,
                Node::Text(text) if capturing => {
                    if let Some(out) = doc.system_out.as_mut() {
                        out.push_str(&unescape(text));
                    }
                }
                Node::CData(text) if capturing => {
                    if let Some(out) = doc.system_out.as_mut() {
                        out.push_str(text);
                    }
                }
                _ => {}
            }
        }

        Ok(doc)
    }
}

fn attr<'a>(attrs: &[(&str, &'a str)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn count_attr(element: &'static str, key: &'static str, attrs: &[(&str, &str)]) -> Result<u32, Error> {
    match attr(attrs, key) {
        None => Ok(0),
        Some(v) => v.trim().parse().map_err(|_| Error::BadAttribute {
            element,
            attr: key,
            value: v.to_owned(),
        }),
    }
}

/// Whole seconds; fractional values are rounded.
fn time_attr(attrs: &[(&str, &str)]) -> Result<Option<u32>, Error> {
    let Some(v) = attr(attrs, "time") else {
        return Ok(None);
    };
    let v = v.trim();
    if let Ok(secs) = v.parse::<u32>() {
        return Ok(Some(secs));
    }
    match v.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(secs.round() as u32)),
        _ => Err(Error::BadAttribute {
            element: "testcase",
            attr: "time",
            value: v.to_owned(),
        }),
    }
}

/// Replace predefined and numeric character references.
/// Unknown or malformed references are left as they are.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let c = match &rest[1..semi] {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                num => num
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| num.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
