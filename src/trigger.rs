//! Trigger events delivered by platform lifecycle glue.

/// An externally observed occurrence that may start a capture.
///
/// Platform integrations (lock-screen receivers, boot hooks, test
/// harnesses) own the sending half of the controller's trigger channel
/// and push one event per human action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// The user unlocked the device.
    Unlocked,
    /// The device finished booting.
    Booted,
}

impl TriggerEvent {
    /// Short name for logging.
    pub fn label(&self) -> &'static str {
        match self {
            TriggerEvent::Unlocked => "unlocked",
            TriggerEvent::Booted => "booted",
        }
    }
}
