//! Birthday card model, terminal rendering and export.
//!
//! Elements marked `no_export` (buttons, theme picker) appear on screen but
//! never in an exported file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ExportError;
use crate::wish::BirthdayWish;

pub const MANUAL_CAPTURE_MESSAGE: &str = "Download failed. Please take a screenshot instead!";

const CARD_WIDTH: u32 = 800;
const HEADER_HEIGHT: u32 = 300;
const LINE_HEIGHT: u32 = 34;
const WRAP_COLUMNS: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardTheme {
    #[default]
    Classic,
    Royal,
    Pop,
    Vintage,
    Neon,
}

/// Colours used by the SVG export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: &'static str,
    pub header: &'static str,
    pub heading: &'static str,
    pub text: &'static str,
    pub accent: &'static str,
    pub label: &'static str,
}

impl CardTheme {
    pub const ALL: [CardTheme; 5] = [
        CardTheme::Classic,
        CardTheme::Royal,
        CardTheme::Pop,
        CardTheme::Vintage,
        CardTheme::Neon,
    ];

    pub fn palette(self) -> Palette {
        match self {
            CardTheme::Classic => Palette {
                background: "#ffffff",
                header: "#fff1f2",
                heading: "#e11d48",
                text: "#374151",
                accent: "#fff1f2",
                label: "#f43f5e",
            },
            CardTheme::Royal => Palette {
                background: "#0f172a",
                header: "#1e293b",
                heading: "#fbbf24",
                text: "#e2e8f0",
                accent: "#1e293b",
                label: "#fbbf24",
            },
            CardTheme::Pop => Palette {
                background: "#4f46e5",
                header: "#6366f1",
                heading: "#67e8f9",
                text: "#ffffff",
                accent: "#6d5ff0",
                label: "#67e8f9",
            },
            CardTheme::Vintage => Palette {
                background: "#fdf6e3",
                header: "#eee8d5",
                heading: "#b58900",
                text: "#657b83",
                accent: "#eee8d5",
                label: "#b58900",
            },
            CardTheme::Neon => Palette {
                background: "#000000",
                header: "#18181b",
                heading: "#d946ef",
                text: "#bef264",
                accent: "#18181b",
                label: "#d946ef",
            },
        }
    }
}

impl std::fmt::Display for CardTheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CardTheme::Classic => "classic",
            CardTheme::Royal => "royal",
            CardTheme::Pop => "pop",
            CardTheme::Vintage => "vintage",
            CardTheme::Neon => "neon",
        };
        f.write_str(s)
    }
}

impl FromStr for CardTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CardTheme::ALL
            .into_iter()
            .find(|t| t.to_string() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown theme: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardHeader {
    /// `data:` URI (or any URL) of the generated background.
    Image(String),
    /// No image: a large "Happy Birthday!" heading instead.
    TextFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    ThemePicker,
    Title,
    Message,
    Poem,
    Quote,
    FunFact,
    Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardElement {
    pub role: ElementRole,
    pub label: Option<&'static str>,
    pub text: String,
    pub no_export: bool,
}

impl CardElement {
    fn content(role: ElementRole, label: Option<&'static str>, text: &str) -> Self {
        Self {
            role,
            label,
            text: text.trim().to_string(),
            no_export: false,
        }
    }

    fn control(role: ElementRole, text: &str) -> Self {
        Self {
            role,
            label: None,
            text: text.to_string(),
            no_export: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub header: CardHeader,
    pub theme: CardTheme,
    pub elements: Vec<CardElement>,
}

impl Card {
    /// An empty `image` selects the text-only header.
    pub fn new(wish: &BirthdayWish, image: &str) -> Self {
        let header = if image.trim().is_empty() {
            CardHeader::TextFallback
        } else {
            CardHeader::Image(image.trim().to_string())
        };
        let themes = CardTheme::ALL
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" | ");

        let elements = vec![
            CardElement::control(ElementRole::ThemePicker, &format!("Card Ka Design Chunein: {themes}")),
            CardElement::content(ElementRole::Title, None, &wish.title),
            CardElement::content(ElementRole::Message, None, &wish.message),
            CardElement::content(ElementRole::Poem, Some("Eak Pyari Kavita"), &wish.poem),
            CardElement::content(ElementRole::Quote, Some("Quote"), &wish.short_quote),
            CardElement::content(ElementRole::FunFact, Some("Secret Legend"), &wish.fun_fact),
            CardElement::control(ElementRole::Control, "[cake] Cut the Cake"),
            CardElement::control(ElementRole::Control, "[new] Naya Wish!"),
            CardElement::control(ElementRole::Control, "[save] Download Card"),
        ];

        Self {
            header,
            theme: CardTheme::default(),
            elements,
        }
    }

    pub fn with_theme(mut self, theme: CardTheme) -> Self {
        self.theme = theme;
        self
    }

    pub fn title(&self) -> &str {
        self.elements
            .iter()
            .find(|e| e.role == ElementRole::Title)
            .map(|e| e.text.as_str())
            .unwrap_or_default()
    }

    /// Elements that belong in an exported file.
    pub fn exportable(&self) -> impl Iterator<Item = &CardElement> {
        self.elements.iter().filter(|e| !e.no_export)
    }

    /// `Birthday_Card_<title with underscores>`.
    pub fn file_stem(&self) -> String {
        let title = self.title().split_whitespace().collect::<Vec<_>>().join("_");
        let safe: String = title
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        format!("Birthday_Card_{safe}")
    }

    /// Full on-screen rendering, controls included.
    pub fn render_text(&self) -> String {
        self.render(self.elements.iter())
    }

    /// Export rendering: same layout, no controls.
    pub fn to_plain_text(&self) -> String {
        self.render(self.exportable())
    }

    fn render<'a>(&self, elements: impl Iterator<Item = &'a CardElement>) -> String {
        let mut out = String::new();
        match &self.header {
            CardHeader::Image(_) => out.push_str("[ festive background image ]\n"),
            CardHeader::TextFallback => out.push_str("~~ Happy Birthday! ~~\n"),
        }
        for element in elements {
            out.push('\n');
            match element.role {
                ElementRole::Title => {
                    let _ = writeln!(out, "{}", element.text.to_uppercase());
                }
                ElementRole::Message => {
                    let _ = writeln!(out, "\"{}\"", element.text);
                }
                _ => {
                    if let Some(label) = element.label {
                        let _ = writeln!(out, "{label}");
                    }
                    let _ = writeln!(out, "{}", element.text);
                }
            }
        }
        out
    }

    /// Standalone SVG of the exportable elements.
    pub fn to_svg(&self) -> Result<String, ExportError> {
        let palette = self.theme.palette();
        let mut body = String::new();
        let mut y = HEADER_HEIGHT + 60;
        let center = CARD_WIDTH / 2;

        for element in self.exportable() {
            let (size, weight, fill) = match element.role {
                ElementRole::Title => (36, "900", palette.heading),
                ElementRole::Message => (24, "700", palette.text),
                _ => (20, "500", palette.text),
            };
            if let Some(label) = element.label {
                let _ = writeln!(
                    body,
                    r#"  <text x="{center}" y="{y}" font-size="14" font-weight="900" fill="{}" text-anchor="middle" letter-spacing="3">{}</text>"#,
                    palette.label,
                    escape_xml(&label.to_uppercase())
                );
                y += LINE_HEIGHT;
            }
            let text = match element.role {
                ElementRole::Message => format!("\u{201c}{}\u{201d}", element.text),
                _ => element.text.clone(),
            };
            for line in wrap(&text, WRAP_COLUMNS) {
                let _ = writeln!(
                    body,
                    r#"  <text x="{center}" y="{y}" font-size="{size}" font-weight="{weight}" fill="{fill}" text-anchor="middle">{}</text>"#,
                    escape_xml(&line)
                );
                y += LINE_HEIGHT;
            }
            y += LINE_HEIGHT / 2;
        }
        let height = y + 40;

        let header = match &self.header {
            CardHeader::Image(uri) => {
                validate_image(uri)?;
                format!(
                    r#"  <image href="{}" x="0" y="0" width="{CARD_WIDTH}" height="{HEADER_HEIGHT}" preserveAspectRatio="xMidYMid slice"/>"#,
                    escape_xml(uri)
                )
            }
            CardHeader::TextFallback => format!(
                r#"  <text x="{center}" y="{}" font-size="64" font-family="cursive" fill="{}" text-anchor="middle">Happy Birthday!</text>"#,
                HEADER_HEIGHT / 2 + 20,
                palette.heading
            ),
        };

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CARD_WIDTH}" height="{height}" viewBox="0 0 {CARD_WIDTH} {height}">"#
        );
        let _ = writeln!(
            svg,
            r#"  <rect width="{CARD_WIDTH}" height="{height}" rx="48" fill="{}"/>"#,
            palette.background
        );
        let _ = writeln!(
            svg,
            r#"  <rect width="{CARD_WIDTH}" height="{HEADER_HEIGHT}" fill="{}"/>"#,
            palette.header
        );
        svg.push_str(&header);
        svg.push('\n');
        svg.push_str(&body);
        svg.push_str("</svg>\n");
        Ok(svg)
    }
}

/// Where an export ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Svg(PathBuf),
    /// SVG failed; plain text written instead.
    Fallback(PathBuf),
    /// Both formats failed. Carries the message to show the user.
    ManualCapture(String),
}

/// Write `card` to `path` as SVG, falling back once to plain text next to it.
/// Never fails: the last resort is asking the user for a screenshot.
pub fn export_card(card: &Card, path: &Path) -> ExportOutcome {
    let svg_path = path.with_extension("svg");
    match card.to_svg().and_then(|svg| write_file(&svg_path, &svg)) {
        Ok(()) => {
            info!(path = %svg_path.display(), "card exported");
            return ExportOutcome::Svg(svg_path);
        }
        Err(e) => warn!(error = %e, path = %svg_path.display(), "svg export failed, trying text"),
    }

    let text_path = path.with_extension("txt");
    match write_file(&text_path, &card.to_plain_text()) {
        Ok(()) => {
            info!(path = %text_path.display(), "card exported as text");
            ExportOutcome::Fallback(text_path)
        }
        Err(e) => {
            warn!(error = %e, path = %text_path.display(), "text export failed");
            ExportOutcome::ManualCapture(MANUAL_CAPTURE_MESSAGE.to_string())
        }
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExportError> {
    std::fs::write(path, contents)?;
    Ok(())
}

/// Base64 `data:` URIs must decode; other URLs are embedded as-is.
fn validate_image(uri: &str) -> Result<(), ExportError> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Ok(());
    };
    if let Some((meta, data)) = rest.split_once(',') {
        if meta.ends_with(";base64") {
            base64::engine::general_purpose::STANDARD.decode(data.trim())?;
        }
    }
    Ok(())
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Greedy word wrap. Explicit newlines are kept.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > columns {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
    }
    lines
}
