//! Modal dialogs requested by emulated code and answered by the host.

/// Identifier of the button a dialog was dismissed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialogItemId(pub u16);

/// Dialog the execution context wants the host to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRequest {
    /// Window title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Button labels; button `i` answers with `DialogItemId(i)`.
    pub buttons: Vec<String>,
    /// Button chosen when the user just presses return.
    pub default_item: DialogItemId,
}

impl DialogRequest {
    /// Creates a dialog with the given buttons, defaulting to the first.
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>, buttons: &[&str]) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            buttons: buttons.iter().map(|label| (*label).to_owned()).collect(),
            default_item: DialogItemId(0),
        }
    }

    /// Label of `item`, if it names a button.
    #[must_use]
    pub fn label(&self, item: DialogItemId) -> Option<&str> {
        self.buttons.get(usize::from(item.0)).map(String::as_str)
    }
}

/// Host UI layer that renders dialogs on a controller thread.
pub trait HostDialog: Send + Sync {
    /// Shows `request` modally and returns the chosen item.
    fn run_dialog(&self, request: &DialogRequest) -> DialogItemId;
}
