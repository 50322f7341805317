use pulldown_cmark::{Event as MDEvent, Options, Parser, Tag as MDTag};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

// --- Markdown Renderer ---
// Assistant replies arrive as markdown; render the common subset as styled terminal lines.

fn base_style() -> Style {
    Style::default().fg(Color::Cyan)
}

struct Renderer {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    style: Style,
    list_stack: Vec<Option<u64>>, // Next number for ordered lists
}

impl Renderer {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            spans: Vec::new(),
            style: base_style(),
            list_stack: Vec::new(),
        }
    }

    fn flush(&mut self) {
        if !self.spans.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.spans)));
        }
    }

    fn fence(&mut self) {
        self.lines.push(Line::styled("```", Style::default().fg(Color::DarkGray)));
    }

    fn start(&mut self, tag: MDTag) {
        match tag {
            MDTag::Paragraph => self.style = base_style(),
            MDTag::Heading(level, _, _) => {
                self.flush();
                self.style = Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD);
                self.spans.push(Span::styled("#".repeat(level as usize) + " ", self.style));
            }
            MDTag::BlockQuote => {
                self.flush();
                self.style = Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC);
                self.spans.push(Span::styled("> ", self.style));
            }
            MDTag::CodeBlock(_) => {
                self.flush();
                self.style = Style::default().bg(Color::Rgb(40, 40, 40)).fg(Color::White);
                self.fence();
            }
            MDTag::List(start) => {
                self.flush();
                self.list_stack.push(start);
            }
            MDTag::Item => {
                self.flush();
                let indent = "  ".repeat(self.list_stack.len().saturating_sub(1));
                let marker = match self.list_stack.last_mut() {
                    Some(Some(next)) => {
                        let marker = format!("{}. ", next);
                        *next += 1;
                        marker
                    }
                    _ => "* ".to_string(),
                };
                self.style = base_style();
                self.spans.push(Span::raw(indent));
                self.spans.push(Span::styled(marker, Style::default().fg(Color::Green)));
            }
            MDTag::Emphasis => self.style = self.style.add_modifier(Modifier::ITALIC),
            MDTag::Strong => self.style = self.style.add_modifier(Modifier::BOLD),
            MDTag::Strikethrough => self.style = self.style.add_modifier(Modifier::CROSSED_OUT),
            MDTag::Link(..) => self.style = self.style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED),
            MDTag::Image(..) => self
                .spans
                .push(Span::styled("[Image]", Style::default().fg(Color::DarkGray))),
            MDTag::Table(_) | MDTag::TableHead | MDTag::TableRow | MDTag::TableCell => {}
            MDTag::FootnoteDefinition(_) => {}
        }
    }

    fn end(&mut self, tag: MDTag) {
        match tag {
            MDTag::Paragraph | MDTag::Heading(..) | MDTag::Item | MDTag::BlockQuote => self.flush(),
            MDTag::CodeBlock(_) => {
                self.flush();
                self.fence();
                self.style = base_style();
            }
            MDTag::List(_) => {
                self.list_stack.pop();
            }
            MDTag::Emphasis => self.style = self.style.remove_modifier(Modifier::ITALIC),
            MDTag::Strong => self.style = self.style.remove_modifier(Modifier::BOLD),
            MDTag::Strikethrough => self.style = self.style.remove_modifier(Modifier::CROSSED_OUT),
            MDTag::Link(..) => self.style = self.style.remove_modifier(Modifier::UNDERLINED).fg(Color::Cyan),
            MDTag::Table(_) | MDTag::TableHead | MDTag::TableRow | MDTag::TableCell => {}
            MDTag::Image(..) | MDTag::FootnoteDefinition(_) => {}
        }
    }

    fn text(&mut self, text: &str) {
        for (i, segment) in text.lines().enumerate() {
            if i > 0 {
                self.flush();
            }
            self.spans.push(Span::styled(segment.to_string(), self.style));
        }
        if text.ends_with('\n') {
            self.flush();
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush();
        if self.lines.is_empty() {
            self.lines.push(Line::raw(""));
        }
        self.lines
    }
}

pub fn render_markdown(markdown_input: &str) -> Vec<Line<'static>> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut renderer = Renderer::new();
    let inline_code_style = Style::default()
        .bg(Color::Rgb(50, 50, 50))
        .fg(Color::Yellow)
        .add_modifier(Modifier::ITALIC);

    for event in Parser::new_ext(markdown_input, options) {
        match event {
            MDEvent::Start(tag) => renderer.start(tag),
            MDEvent::End(tag) => renderer.end(tag),
            MDEvent::Text(text) => renderer.text(&text),
            MDEvent::Code(code) => renderer.spans.push(Span::styled(code.to_string(), inline_code_style)),
            MDEvent::Html(_) | MDEvent::FootnoteReference(_) => {}
            MDEvent::SoftBreak => renderer.spans.push(Span::raw(" ")),
            MDEvent::HardBreak => renderer.flush(),
            MDEvent::Rule => {
                renderer.flush();
                renderer
                    .lines
                    .push(Line::styled("─".repeat(40), Style::default().fg(Color::DarkGray)));
            }
            MDEvent::TaskListMarker(checked) => {
                let marker = if checked { "[x] " } else { "[ ] " };
                renderer.spans.push(Span::styled(marker, Style::default().fg(Color::Yellow)));
            }
        }
    }

    renderer.finish()
}
