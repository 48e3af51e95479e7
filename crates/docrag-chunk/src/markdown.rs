//! Heading-aware markdown chunker.
//!
//! A new chunk starts at every H1, H2 or H3 heading. H1 text becomes the page
//! title; H2/H3 text becomes the section and the heading path. Sections over
//! the size threshold are split at blank lines outside fenced code blocks,
//! and fenced blocks are never divided.

use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};
use tracing::debug;

use docrag_core::{Chunk, Chunker, RagError, Result};

use crate::marker::strip_source_marker;

/// Default size threshold: roughly 500 tokens at 4 characters per token.
const DEFAULT_MAX_CHARS: usize = 2000;

/// A level 1-3 heading outside any container block.
#[derive(Debug)]
struct Heading {
    level: u8,
    span: Range<usize>,
    title: String,
}

/// Headings and fenced code block spans of a document, as byte offsets.
#[derive(Debug, Default)]
struct Outline {
    headings: Vec<Heading>,
    fences: Vec<Range<usize>>,
}

impl Outline {
    fn parse(text: &str) -> Self {
        let mut outline = Self::default();
        let mut container_depth = 0usize;
        let mut open_heading: Option<(u8, usize, String)> = None;
        let mut fence_start: Option<usize> = None;

        for (event, range) in Parser::new(text).into_offset_iter() {
            match event {
                Event::Start(Tag::BlockQuote) | Event::Start(Tag::List(_)) => {
                    container_depth += 1;
                }
                Event::End(TagEnd::BlockQuote) | Event::End(TagEnd::List(_)) => {
                    container_depth = container_depth.saturating_sub(1);
                }
                Event::Start(Tag::Heading { level, .. }) if container_depth == 0 => {
                    let level = heading_level(level);
                    if level <= 3 {
                        open_heading = Some((level, range.start, String::new()));
                    }
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, start, title)) = open_heading.take() {
                        outline.headings.push(Heading {
                            level,
                            span: start..range.end,
                            title: title.trim().to_string(),
                        });
                    }
                }
                Event::Text(text) | Event::Code(text) => {
                    if let Some((_, _, title)) = open_heading.as_mut() {
                        title.push_str(&text);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if let Some((_, _, title)) = open_heading.as_mut() {
                        title.push(' ');
                    }
                }
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(_))) => {
                    fence_start = Some(range.start);
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(start) = fence_start.take() {
                        outline.fences.push(start..range.end);
                    }
                }
                _ => {}
            }
        }

        outline
    }

    /// Whether `offset` lies strictly inside a fenced block.
    fn in_fence(&self, offset: usize) -> bool {
        self.fences
            .iter()
            .any(|fence| offset > fence.start && offset < fence.end)
    }

    /// Whether a fenced block starts within `span`.
    fn has_fence_in(&self, span: &Range<usize>) -> bool {
        self.fences
            .iter()
            .any(|fence| fence.start >= span.start && fence.start < span.end)
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// One heading-delimited region of the document.
struct Section {
    span: Range<usize>,
    /// End of the heading line, or the section start when there is no heading.
    body_start: usize,
    section: String,
    hierarchy: Vec<String>,
}

/// Markdown chunker that follows the document's heading structure.
#[derive(Debug, Clone)]
pub struct MarkdownChunker {
    max_chars: usize,
}

impl MarkdownChunker {
    /// Create a chunker that splits sections longer than `max_chars` characters.
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    /// Size threshold in characters.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn sections(text: &str, outline: &Outline) -> Vec<Section> {
        let mut sections = Vec::with_capacity(outline.headings.len() + 1);
        let first_heading = outline
            .headings
            .first()
            .map(|h| h.span.start)
            .unwrap_or(text.len());

        if first_heading > 0 {
            sections.push(Section {
                span: 0..first_heading,
                body_start: 0,
                section: String::new(),
                hierarchy: Vec::new(),
            });
        }

        let mut current_h2: Option<&str> = None;
        for (i, heading) in outline.headings.iter().enumerate() {
            let end = outline
                .headings
                .get(i + 1)
                .map(|next| next.span.start)
                .unwrap_or(text.len());

            let (section, hierarchy) = match heading.level {
                1 => {
                    current_h2 = None;
                    (String::new(), Vec::new())
                }
                2 => {
                    current_h2 = Some(heading.title.as_str());
                    (heading.title.clone(), vec![heading.title.clone()])
                }
                _ => {
                    let mut hierarchy = Vec::with_capacity(2);
                    if let Some(h2) = current_h2 {
                        hierarchy.push(h2.to_string());
                    }
                    hierarchy.push(heading.title.clone());
                    (heading.title.clone(), hierarchy)
                }
            };

            sections.push(Section {
                span: heading.span.start..end,
                body_start: heading.span.end.min(end),
                section,
                hierarchy,
            });
        }

        sections
    }

    /// Paragraph units of a span: runs of lines separated by blank lines outside fences.
    fn paragraph_units(text: &str, span: &Range<usize>, outline: &Outline) -> Vec<Range<usize>> {
        let mut units = Vec::new();
        let mut unit_start: Option<usize> = None;
        let mut offset = span.start;

        for line in text[span.clone()].split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();

            if line.trim().is_empty() && !outline.in_fence(line_start) {
                if let Some(start) = unit_start.take() {
                    units.push(start..line_start);
                }
            } else if unit_start.is_none() {
                unit_start = Some(line_start);
            }
        }

        if let Some(start) = unit_start {
            units.push(start..span.end);
        }

        units
    }

    /// Greedily pack paragraph units into spans of at most `max_chars` characters.
    fn pack_units(&self, text: &str, units: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for unit in units {
            current = match current {
                None => Some(unit),
                Some(span) => {
                    let merged = span.start..unit.end;
                    if char_len(&text[merged.clone()]) <= self.max_chars {
                        Some(merged)
                    } else {
                        spans.push(span);
                        Some(unit)
                    }
                }
            };
        }

        spans.extend(current);
        spans
    }
}

impl Default for MarkdownChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, document: &str, source_url: &str) -> Result<Vec<Chunk>> {
        if source_url.trim().is_empty() {
            return Err(RagError::invalid_argument("source_url must not be empty"));
        }

        let text = strip_source_marker(document);
        let outline = Outline::parse(&text);
        let page_title = outline
            .headings
            .iter()
            .find(|h| h.level == 1)
            .map(|h| h.title.clone())
            .unwrap_or_default();

        let mut chunks = Vec::new();
        for section in Self::sections(&text, &outline) {
            if text[section.body_start..section.span.end].trim().is_empty() {
                continue;
            }

            let spans = if char_len(text[section.span.clone()].trim()) <= self.max_chars {
                vec![section.span.clone()]
            } else {
                let mut units = Self::paragraph_units(&text, &section.span, &outline);
                // A heading travels with the paragraph it introduces.
                let heading = text[section.span.start..section.body_start].trim();
                if units.len() > 1
                    && !heading.is_empty()
                    && text[units[0].clone()].trim() == heading
                {
                    let heading_unit = units.remove(0);
                    units[0].start = heading_unit.start;
                }
                self.pack_units(&text, units)
            };

            for span in spans {
                let content = text[span.clone()].trim();
                if content.is_empty() {
                    continue;
                }
                chunks.push(Chunk {
                    content: content.to_string(),
                    source_url: source_url.to_string(),
                    page_title: page_title.clone(),
                    section: section.section.clone(),
                    hierarchy: section.hierarchy.clone(),
                    has_code: outline.has_fence_in(&span),
                    chunk_index: chunks.len() as u32,
                });
            }
        }

        debug!("Chunked {} into {} chunks", source_url, chunks.len());
        Ok(chunks)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
