//! Plain-text documents: `.txt`, `.rst`, `.yaml`, `.json`, `.toml`.
//!
//! Content is kept verbatim except for reStructuredText adornment lines,
//! which become section headings.

use crate::error::Result;
use crate::models::{document_id, IndexedItem, ItemKind, Section, SourceFile};
use crate::parser::{base_metadata, extension, file_stem, Parser};

const EXTENSIONS: &[&str] = &["txt", "text", "rst", "yaml", "yml", "json", "toml"];
const RST_ADORNMENTS: &[char] = &['=', '-', '~', '^', '*', '#', '+', '"', '\''];

pub struct PlainTextParser;

impl Parser for PlainTextParser {
    fn name(&self) -> &str {
        "text"
    }

    fn can_handle(&self, path: &str) -> bool {
        extension(path)
            .map(|e| EXTENSIONS.contains(&e.as_str()))
            .unwrap_or(false)
    }

    fn parse(&self, file: &SourceFile) -> Result<Vec<IndexedItem>> {
        let (content, sections) = if extension(&file.path).as_deref() == Some("rst") {
            parse_rst(&file.content)
        } else {
            (file.content.trim_end().to_string(), Vec::new())
        };

        let title = sections
            .first()
            .map(|s| s.title.clone())
            .unwrap_or_else(|| file_stem(&file.path));
        let sections = if sections.is_empty() {
            vec![Section {
                title: "Content".to_string(),
                level: 1,
                byte_offset: 0,
                content_offset: 0,
            }]
        } else {
            sections
        };

        let mut meta = base_metadata(file);
        meta.insert("sections".to_string(), serde_json::to_value(&sections)?);

        Ok(vec![IndexedItem {
            id: document_id(&file.path),
            path: file.path.clone(),
            fingerprint: file.fingerprint.clone(),
            kind: ItemKind::Document,
            title,
            content,
            metadata: serde_json::Value::Object(meta),
            indexed_at: file.indexed_at,
            code: None,
        }])
    }
}

fn is_adornment(line: &str) -> Option<char> {
    let trimmed = line.trim_end();
    let first = trimmed.chars().next()?;
    if trimmed.len() >= 2 && RST_ADORNMENTS.contains(&first) && trimmed.chars().all(|c| c == first)
    {
        Some(first)
    } else {
        None
    }
}

/// Strip underline (and overline) adornments, recording each titled line as a section.
fn parse_rst(source: &str) -> (String, Vec<Section>) {
    let lines: Vec<(usize, &str)> = {
        let mut offset = 0;
        source
            .split_inclusive('\n')
            .map(|l| {
                let start = offset;
                offset += l.len();
                (start, l.trim_end_matches(&['\n', '\r'][..]))
            })
            .collect()
    };

    let mut content = String::new();
    let mut sections = Vec::new();
    let mut levels: Vec<char> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let (start, line) = lines[i];
        let underline = lines.get(i + 1).and_then(|(_, next)| {
            is_adornment(next).filter(|_| {
                !line.trim().is_empty()
                    && is_adornment(line).is_none()
                    && next.trim_end().chars().count() >= line.trim().chars().count()
            })
        });

        match underline {
            Some(ch) => {
                let level = match levels.iter().position(|c| *c == ch) {
                    Some(pos) => pos + 1,
                    None => {
                        levels.push(ch);
                        levels.len()
                    }
                };
                sections.push(Section {
                    title: line.trim().to_string(),
                    level: level as u32,
                    byte_offset: start,
                    content_offset: content.len(),
                });
                content.push_str(line.trim());
                content.push('\n');
                i += 2;
            }
            None => {
                // Overlines (adornment directly above a titled line) are dropped too
                if is_adornment(line).is_none() {
                    content.push_str(line);
                    content.push('\n');
                }
                i += 1;
            }
        }
    }

    let trimmed = content.trim_end().len();
    content.truncate(trimmed);
    (content, sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::source;

    #[test]
    fn text_file_title_is_stem() {
        let items = PlainTextParser
            .parse(&source("notes/deploy.txt", "Kubernetes notes\n"))
            .unwrap();
        assert_eq!(items[0].title, "deploy");
        assert_eq!(items[0].content, "Kubernetes notes");
        assert_eq!(items[0].sections()[0].title, "Content");
    }

    #[test]
    fn rst_headings_become_sections() {
        let src = "Service Guide\n=============\n\nIntro.\n\nRetry\n-----\n\nBack off.\n";
        let items = PlainTextParser.parse(&source("guide.rst", src)).unwrap();
        let item = &items[0];
        assert_eq!(item.title, "Service Guide");

        let sections = item.sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "Retry");
        assert_eq!(sections[1].level, 2);
        assert_eq!(&src[sections[1].byte_offset..sections[1].byte_offset + 5], "Retry");
        assert!(item.content[sections[1].content_offset..].starts_with("Retry"));
        assert!(!item.content.contains("====="));
    }

    #[test]
    fn yaml_is_handled() {
        assert!(PlainTextParser.can_handle("deploy/values.yml"));
        assert!(!PlainTextParser.can_handle("main.py"));
    }
}
