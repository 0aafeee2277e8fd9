//! Markdown document parser.
//!
//! Produces one document item per file. Markup is stripped from `content`;
//! the heading hierarchy is kept as [`Section`] records carrying both the
//! byte offset of the heading in the source and the offset where the section
//! starts in the stripped text, so search hits can name their section.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser as MdParser, Tag, TagEnd};

use crate::error::Result;
use crate::models::{document_id, IndexedItem, ItemKind, Section, SourceFile};
use crate::parser::{base_metadata, extension, file_stem, Parser};

pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn name(&self) -> &str {
        "markdown"
    }

    fn can_handle(&self, path: &str) -> bool {
        matches!(extension(path).as_deref(), Some("md" | "markdown"))
    }

    fn parse(&self, file: &SourceFile) -> Result<Vec<IndexedItem>> {
        let doc = parse_markdown(&file.content);

        let title = doc
            .sections
            .iter()
            .find(|s| s.level == 1)
            .or_else(|| doc.sections.first())
            .map(|s| s.title.clone())
            .unwrap_or_else(|| file_stem(&file.path));

        let mut meta = base_metadata(file);
        meta.insert("sections".to_string(), serde_json::to_value(&doc.sections)?);
        meta.insert("links".to_string(), serde_json::json!(doc.links));
        meta.insert("code_blocks".to_string(), serde_json::json!(doc.code_blocks));

        Ok(vec![IndexedItem {
            id: document_id(&file.path),
            path: file.path.clone(),
            fingerprint: file.fingerprint.clone(),
            kind: ItemKind::Document,
            title,
            content: doc.content,
            metadata: serde_json::Value::Object(meta),
            indexed_at: file.indexed_at,
            code: None,
        }])
    }
}

/// Stripped text plus structure extracted from a Markdown source.
#[derive(Debug, Default)]
pub struct MarkdownDoc {
    pub content: String,
    pub sections: Vec<Section>,
    pub links: Vec<String>,
    /// Info string of each fenced code block (empty when none was given).
    pub code_blocks: Vec<String>,
}

pub fn parse_markdown(source: &str) -> MarkdownDoc {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let mut doc = MarkdownDoc::default();

    // (level, byte_offset, content_offset, heading text so far)
    let mut open_heading: Option<(u32, usize, usize, String)> = None;

    for (event, range) in MdParser::new_ext(source, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                block_break(&mut doc.content);
                open_heading = Some((level as u32, range.start, doc.content.len(), String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, byte_offset, content_offset, text)) = open_heading.take() {
                    doc.sections.push(Section {
                        title: text.trim().to_string(),
                        level,
                        byte_offset,
                        content_offset,
                    });
                }
                block_break(&mut doc.content);
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                doc.links.push(dest_url.to_string());
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                block_break(&mut doc.content);
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or("").to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                doc.code_blocks.push(lang);
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, _, heading)) = open_heading.as_mut() {
                    heading.push_str(&text);
                }
                doc.content.push_str(&text);
            }
            Event::SoftBreak => {
                if let Some((_, _, _, heading)) = open_heading.as_mut() {
                    heading.push(' ');
                }
                doc.content.push(' ');
            }
            Event::HardBreak => doc.content.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_)
                | TagEnd::List(_)
                | TagEnd::Table,
            ) => block_break(&mut doc.content),
            Event::End(TagEnd::Item | TagEnd::TableRow | TagEnd::TableHead) => {
                line_break(&mut doc.content)
            }
            Event::End(TagEnd::TableCell) => doc.content.push(' '),
            _ => {}
        }
    }

    let trimmed = doc.content.trim_end().len();
    doc.content.truncate(trimmed);
    doc
}

fn block_break(content: &mut String) {
    if content.is_empty() || content.ends_with("\n\n") {
        return;
    }
    if content.ends_with('\n') {
        content.push('\n');
    } else {
        content.push_str("\n\n");
    }
}

fn line_break(content: &mut String) {
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::source;

    const GUIDE: &str = "# Guide\n\nIntro text.\n\n## Retry Policy\n\nRetries use **exponential** backoff.\nSee [the docs](https://example.com/retry).\n\n```python\nretry(3)\n```\n";

    #[test]
    fn sections_carry_source_and_content_offsets() {
        let doc = parse_markdown(GUIDE);
        assert_eq!(doc.sections.len(), 2);

        let retry = &doc.sections[1];
        assert_eq!(retry.title, "Retry Policy");
        assert_eq!(retry.level, 2);
        assert_eq!(&GUIDE[retry.byte_offset..retry.byte_offset + 15], "## Retry Policy");
        assert!(doc.content[retry.content_offset..].starts_with("Retry Policy"));
    }

    #[test]
    fn markup_is_stripped() {
        let doc = parse_markdown(GUIDE);
        assert!(doc.content.contains("Retries use exponential backoff."));
        assert!(!doc.content.contains("**"));
        assert!(!doc.content.contains("]("));
        assert!(doc.content.contains("retry(3)"));
    }

    #[test]
    fn links_and_code_blocks_are_collected() {
        let doc = parse_markdown(GUIDE);
        assert_eq!(doc.links, vec!["https://example.com/retry"]);
        assert_eq!(doc.code_blocks, vec!["python"]);
    }

    #[test]
    fn title_prefers_first_h1_then_stem() {
        let items = MarkdownParser
            .parse(&source("docs/guide.md", "## Setup\n\n# Real Title\n"))
            .unwrap();
        assert_eq!(items[0].title, "Real Title");

        let items = MarkdownParser
            .parse(&source("docs/notes.md", "just text\n"))
            .unwrap();
        assert_eq!(items[0].title, "notes");
        assert_eq!(items[0].id, "doc:docs/notes.md");
        assert_eq!(items[0].metadata["doc_type"], "md");
        assert_eq!(items[0].metadata["line_count"], 1);
    }
}
