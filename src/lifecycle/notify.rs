//! Status notification
//!
//! Observers receive advisory [`ProgressEvent`]s. They are passed explicitly
//! into every operation and have no influence on control flow: a panicking
//! observer is logged and ignored.

use crate::types::ProgressEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;

/// Receiver of status updates
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, event: &ProgressEvent);
}

impl<F> StatusObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_status(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Observer that drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StatusObserver for NoopObserver {
    fn on_status(&self, _event: &ProgressEvent) {}
}

/// Observer forwarding updates into a channel, e.g. towards a UI task
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusObserver for ChannelObserver {
    fn on_status(&self, event: &ProgressEvent) {
        // A closed receiver just means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

/// Panic-isolating wrapper used internally to emit events
#[derive(Clone, Copy)]
pub(crate) struct Notifier<'a> {
    observer: &'a dyn StatusObserver,
}

impl<'a> Notifier<'a> {
    pub(crate) fn new(observer: &'a dyn StatusObserver) -> Self {
        Self { observer }
    }

    pub(crate) fn status(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::status(message));
    }

    pub(crate) fn progress(&self, message: impl Into<String>, ratio: f32) {
        self.emit(ProgressEvent::progress(message, ratio));
    }

    fn emit(&self, event: ProgressEvent) {
        tracing::debug!("status: {}", event.message);
        let delivered = catch_unwind(AssertUnwindSafe(|| self.observer.on_status(&event)));
        if delivered.is_err() {
            tracing::warn!("Status observer panicked on {:?}, ignoring", event.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_observer() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: &ProgressEvent| seen.lock().unwrap().push(event.message.clone());
        let notifier = Notifier::new(&observer);
        notifier.status("one");
        notifier.progress("two", 0.5);
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    struct Faulty;

    impl StatusObserver for Faulty {
        fn on_status(&self, _event: &ProgressEvent) {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let notifier = Notifier::new(&Faulty);
        notifier.status("still fine");
        notifier.progress("still fine", 1.0);
    }

    #[tokio::test]
    async fn test_channel_observer() {
        let (observer, mut rx) = ChannelObserver::new();
        Notifier::new(&observer).progress("Downloading model... 50%", 0.5);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.ratio, Some(0.5));
        drop(rx);
        Notifier::new(&observer).status("receiver gone");
    }
}
