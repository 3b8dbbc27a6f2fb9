use std::fmt;
use std::sync::mpsc;

use crate::model::FeatureId;

/// Notifications fired after the operation producing them has completed.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    SelectionChanged(Vec<FeatureId>),
    LocalRangeChanged { min: f32, max: f32 },
    /// The slot buffer changed; re-upload it.
    BufferUpdated { generation: u64 },
}

type Listener = Box<dyn FnMut(&ViewEvent) + Send>;

/// Fan-out to callbacks and channel subscribers. Channel subscribers whose
/// receiver was dropped are pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
    senders: Vec<mpsc::Sender<ViewEvent>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .field("channels", &self.senders.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&ViewEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn channel(&mut self) -> mpsc::Receiver<ViewEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders.push(tx);
        rx
    }

    pub fn emit(&mut self, event: ViewEvent) {
        for l in &mut self.listeners {
            l(&event);
        }
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn callbacks_and_channels_both_receive() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |e| sink.lock().push(e.clone()));
        let rx = bus.channel();

        bus.emit(ViewEvent::LocalRangeChanged { min: 1.0, max: 4.0 });
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(rx.try_recv().unwrap(), ViewEvent::LocalRangeChanged { min: 1.0, max: 4.0 });
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut bus = EventBus::new();
        drop(bus.channel());
        let rx = bus.channel();
        bus.emit(ViewEvent::BufferUpdated { generation: 3 });
        assert_eq!(format!("{bus:?}"), "EventBus { listeners: 0, channels: 1 }");
        assert_eq!(rx.try_recv().unwrap(), ViewEvent::BufferUpdated { generation: 3 });
    }
}
