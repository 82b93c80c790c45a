/// The mutually exclusive screens the controller switches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewMode {
    Connection,
    Browser,
    Editor,
    Results,
    History,
    Export,
    Where,
    Columns,
    Chat,
    Schema,
}

impl ViewMode {
    pub const ALL: [Self; 10] = [
        Self::Connection,
        Self::Browser,
        Self::Editor,
        Self::Results,
        Self::History,
        Self::Export,
        Self::Where,
        Self::Columns,
        Self::Chat,
        Self::Schema,
    ];

    /// Views reachable with Tab, in cycle order.
    pub const TAB_ORDER: [Self; 5] = [
        Self::Browser,
        Self::Editor,
        Self::Results,
        Self::History,
        Self::Chat,
    ];

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Connection => "Connections",
            Self::Browser => "Browser",
            Self::Editor => "Query Editor",
            Self::Results => "Results",
            Self::History => "History",
            Self::Export => "Export",
            Self::Where => "Filter",
            Self::Columns => "Columns",
            Self::Chat => "Assistant",
            Self::Schema => "Schema",
        }
    }

    #[must_use]
    pub fn is_tabbable(self) -> bool {
        Self::TAB_ORDER.contains(&self)
    }

    /// Next view in the Tab cycle. Non-tabbable views go to Browser.
    #[must_use]
    pub fn next_tab(self) -> Self {
        match Self::TAB_ORDER.iter().position(|mode| *mode == self) {
            Some(index) => Self::TAB_ORDER[(index + 1) % Self::TAB_ORDER.len()],
            None => Self::Browser,
        }
    }

    /// Where dismissing a fatal error raised in this view lands.
    /// `None` keeps the current view.
    #[must_use]
    pub fn dismiss_fallback(self) -> Option<Self> {
        match self {
            Self::Export | Self::Columns | Self::Chat | Self::Schema => Some(Self::Browser),
            Self::Where => Some(Self::Results),
            Self::Connection | Self::Browser | Self::Editor | Self::Results | Self::History => None,
        }
    }
}

/// Modes visited before the current one, most recent on top.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NavigationStack {
    modes: Vec<ViewMode>,
}

impl NavigationStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mode: ViewMode) {
        self.modes.push(mode);
    }

    /// `None` when empty, so the caller can pick a fallback.
    pub fn pop(&mut self) -> Option<ViewMode> {
        self.modes.pop()
    }

    #[must_use]
    pub fn peek(&self) -> Option<ViewMode> {
        self.modes.last().copied()
    }

    pub fn clear(&mut self) {
        self.modes.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}
