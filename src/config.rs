use clap::ValueEnum;
use std::fmt;
use std::path::{Path, PathBuf};

/// How sections are turned into PDF pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Styled HTML printed by headless Chromium, images included
    #[default]
    PreserveFormatting,
    /// Tag-stripped text typeset directly, no images
    PlainText,
    /// One page image per section, for manga and comics
    FixedLayout,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::PreserveFormatting => "preserve-formatting",
            Mode::PlainText => "plain-text",
            Mode::FixedLayout => "fixed-layout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
}

impl PaperSize {
    /// Width and height in inches.
    pub fn inches(self) -> (f64, f64) {
        match self {
            PaperSize::A4 => (8.27, 11.69),
            PaperSize::Letter => (8.5, 11.0),
        }
    }

    /// Width and height in PDF points.
    pub fn points(self) -> (f32, f32) {
        let (w, h) = self.inches();
        ((w * 72.0) as f32, (h * 72.0) as f32)
    }
}

/// `/PageLayout` written into the catalog of fixed-layout output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "verbatim")]
pub enum PageLayout {
    /// Single page display
    SinglePage,
    /// Enable scrolling
    OneColumn,
    /// Spread view
    TwoPageLeft,
    /// Spread view with scrolling
    TwoColumnLeft,
    /// Separate cover, spread view
    #[default]
    TwoPageRight,
    /// Separate cover, scrolling spread view
    TwoColumnRight,
}

impl PageLayout {
    pub fn pdf_name(self) -> &'static str {
        match self {
            PageLayout::SinglePage => "SinglePage",
            PageLayout::OneColumn => "OneColumn",
            PageLayout::TwoPageLeft => "TwoPageLeft",
            PageLayout::TwoColumnLeft => "TwoColumnLeft",
            PageLayout::TwoPageRight => "TwoPageRight",
            PageLayout::TwoColumnRight => "TwoColumnRight",
        }
    }
}

/// Reading direction, `/ViewerPreferences /Direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Direction {
    /// Left binding
    #[value(name = "L2R")]
    L2R,
    /// Right binding
    #[default]
    #[value(name = "R2L")]
    R2L,
}

impl Direction {
    pub fn pdf_name(self) -> &'static str {
        match self {
            Direction::L2R => "L2R",
            Direction::R2L => "R2L",
        }
    }
}

/// Print settings handed to Chromium. Margins are in inches.
#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub paper: PaperSize,
    pub scale: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub print_background: bool,
    pub no_sandbox: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            paper: PaperSize::default(),
            scale: 1.0,
            margin_top: 0.5,
            margin_right: 0.5,
            margin_bottom: 0.5,
            margin_left: 0.5,
            print_background: true,
            no_sandbox: false,
        }
    }
}

impl PdfOptions {
    pub fn with_margin(mut self, inches: f64) -> Self {
        self.margin_top = inches;
        self.margin_right = inches;
        self.margin_bottom = inches;
        self.margin_left = inches;
        self
    }
}

/// Typesetting settings for plain-text output.
#[derive(Debug, Clone)]
pub struct TextOptions {
    pub paper: PaperSize,
    /// Page margin in inches.
    pub margin: f64,
    pub font_size: f32,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            paper: PaperSize::default(),
            margin: 0.5,
            font_size: 11.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub mode: Mode,
    /// Output path; derived from the input path when `None`.
    pub output: Option<PathBuf>,
    pub pdf: PdfOptions,
    pub text: TextOptions,
    pub layout: PageLayout,
    pub direction: Direction,
}

impl ConvertOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn output_path(&self, input: &Path) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => input.with_extension("pdf"),
        }
    }
}
