//! Output contract for classified change events

use std::sync::mpsc::Sender;
use crate::error::SinkClosed;
use crate::events::ChangeEvent;

/// Receives change events in emission order.
///
/// Presentation (terminal output, log files, ...) lives behind this trait.
/// Returning [`SinkClosed`] ends the session's classifier loop.
pub trait EventSink: Send {
    fn push(&mut self, event: ChangeEvent) -> Result<(), SinkClosed>;
}

impl EventSink for Sender<ChangeEvent> {
    fn push(&mut self, event: ChangeEvent) -> Result<(), SinkClosed> {
        self.send(event).map_err(|_| SinkClosed)
    }
}

impl EventSink for Vec<ChangeEvent> {
    fn push(&mut self, event: ChangeEvent) -> Result<(), SinkClosed> {
        Vec::push(self, event);
        Ok(())
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: FnMut(ChangeEvent) + Send,
{
    fn push(&mut self, event: ChangeEvent) -> Result<(), SinkClosed> {
        (self.0)(event);
        Ok(())
    }
}
