use std::io::{self, Write};
use tracing::warn;

/// Kind of progress event emitted by a sync run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    New,
    Modified,
    MissingFromSource,
    Copying,
    /// The file could not be hashed or copied and was left for the next run.
    Skipped,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::New => "New file:",
            Category::Modified => "Modified file:",
            Category::MissingFromSource => "Missing from source:",
            Category::Copying => "Copying file:",
            Category::Skipped => "Skipped file:",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub category: Category,
    pub name: String,
}

/// Receiver of progress events. Implementations must not block for long.
pub trait Notify {
    fn notify(&mut self, category: Category, name: &str);
}

/// Records events in order; handy for tests and callers that render later.
impl Notify for Vec<Event> {
    fn notify(&mut self, category: Category, name: &str) {
        self.push(Event { category, name: name.to_string() });
    }
}

/// Console notifier that groups consecutive events of one category.
///
/// Every category change, including the first event, is preceded by a blank
/// line. Quiet mode prints nothing.
pub struct Notifier<W: Write> {
    out: W,
    quiet: bool,
    last: Option<Category>,
}

impl<W: Write> Notifier<W> {
    pub fn new(out: W, quiet: bool) -> Self {
        Self { out, quiet, last: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, group_break: bool, category: Category, name: &str) -> io::Result<()> {
        if group_break {
            writeln!(self.out)?;
        }
        writeln!(self.out, "{} {}", category.label(), name)
    }
}

impl<W: Write> Notify for Notifier<W> {
    fn notify(&mut self, category: Category, name: &str) {
        let group_break = self.last != Some(category);
        self.last = Some(category);
        if self.quiet {
            return;
        }
        if let Err(e) = self.write_event(group_break, category, name) {
            warn!("failed to write progress output: {}", e);
        }
    }
}
