//! Supported client views.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// A named logical data domain a client syncs against.
///
/// Each view is served by exactly one domain collaborator on the server.
/// The wire names are the ones shipped in the web clients and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClientView {
    /// Todo lists, tasks and shopping items.
    Todo,
    /// Food tracker entries.
    FoodTracker,
    /// Diary entries.
    Diary,
    /// Ideas board.
    Ideas,
}

impl ClientView {
    /// All supported views.
    pub const ALL: [ClientView; 4] = [
        ClientView::Todo,
        ClientView::FoodTracker,
        ClientView::Diary,
        ClientView::Ideas,
    ];

    /// Returns the wire name of this view.
    pub fn name(&self) -> &'static str {
        match self {
            ClientView::Todo => "todo-replicache-flat",
            ClientView::FoodTracker => "food-tracker-replicache",
            ClientView::Diary => "diary-replicache",
            ClientView::Ideas => "ideas-replicache",
        }
    }

    /// Looks a view up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|view| view.name() == name)
    }
}

impl fmt::Display for ClientView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClientView {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ProtocolError::UnknownClientView(s.to_string()))
    }
}
