//! Colored text streamed alongside call results.
//!
//! The server collects [`TextFragment`]s while a handler runs and ships
//! them as text frames; the client decodes each frame as it arrives and
//! hands the fragments to a [`TextSink`].

use std::io::Write;

use crate::protocol::{CoreTextFragment, CoreTextNotification};

/// Console palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    /// Back to the sink's default color.
    #[default]
    Reset,
    Black,
    Blue,
    Green,
    Cyan,
    Red,
    Magenta,
    Brown,
    Grey,
    DarkGrey,
    LightBlue,
    LightGreen,
    LightCyan,
    LightRed,
    LightMagenta,
    Yellow,
    White,
}

const PALETTE: [Color; 16] = [
    Color::Black,
    Color::Blue,
    Color::Green,
    Color::Cyan,
    Color::Red,
    Color::Magenta,
    Color::Brown,
    Color::Grey,
    Color::DarkGrey,
    Color::LightBlue,
    Color::LightGreen,
    Color::LightCyan,
    Color::LightRed,
    Color::LightMagenta,
    Color::Yellow,
    Color::White,
];

impl Color {
    /// Palette index, or `None` for [`Color::Reset`].
    pub fn index(self) -> Option<i32> {
        PALETTE.iter().position(|c| *c == self).map(|i| i as i32)
    }

    /// Color for a palette index; anything out of range resets.
    pub fn from_index(index: Option<i32>) -> Self {
        index
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| PALETTE.get(i).copied())
            .unwrap_or(Color::Reset)
    }
}

/// One piece of output text in a single color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub color: Color,
    pub text: String,
}

impl TextFragment {
    pub fn new(color: Color, text: impl Into<String>) -> Self {
        Self {
            color,
            text: text.into(),
        }
    }
}

/// Destination for text received from the server.
pub trait TextSink: Send {
    /// Append `text` in `color`.
    fn add_text(&mut self, color: Color, text: &str);

    /// Called before the fragments of one text frame.
    fn begin_batch(&mut self) {}

    /// Called after the fragments of one text frame.
    fn end_batch(&mut self) {}
}

/// Writes text to stdout, ignoring colors.
///
/// Each batch is flushed as a whole so that interleaved output from
/// several frames stays readable.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    pending: String,
    in_batch: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        if let Err(e) = handle
            .write_all(self.pending.as_bytes())
            .and_then(|_| handle.flush())
        {
            tracing::debug!("Dropping remote text, stdout failed: {}", e);
        }
        self.pending.clear();
    }
}

impl TextSink for ConsoleSink {
    fn add_text(&mut self, _color: Color, text: &str) {
        self.pending.push_str(text);
        if !self.in_batch {
            self.flush();
        }
    }

    fn begin_batch(&mut self) {
        self.in_batch = true;
    }

    fn end_batch(&mut self) {
        self.in_batch = false;
        self.flush();
    }
}

/// Collects fragments in memory.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    fragments: Vec<TextFragment>,
    batches: usize,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All fragments received so far.
    pub fn fragments(&self) -> &[TextFragment] {
        &self.fragments
    }

    /// Number of text frames received so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Concatenated text, colors dropped.
    pub fn text(&self) -> String {
        self.fragments.iter().map(|f| f.text.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.batches = 0;
    }
}

impl TextSink for CaptureSink {
    fn add_text(&mut self, color: Color, text: &str) {
        self.fragments.push(TextFragment::new(color, text));
    }

    fn begin_batch(&mut self) {
        self.batches += 1;
    }
}

/// Build the wire notification for a batch of fragments.
pub fn encode_notification(fragments: &[TextFragment]) -> CoreTextNotification {
    CoreTextNotification {
        fragments: fragments
            .iter()
            .map(|f| CoreTextFragment {
                text: f.text.clone(),
                color: f.color.index(),
            })
            .collect(),
    }
}

/// Feed a received notification into `sink` as one batch.
pub fn decode_notification(notification: &CoreTextNotification, sink: &mut dyn TextSink) {
    if notification.fragments.is_empty() {
        return;
    }
    sink.begin_batch();
    for fragment in &notification.fragments {
        sink.add_text(Color::from_index(fragment.color), &fragment.text);
    }
    sink.end_batch();
}
