//! Publish/subscribe channel for snake lifecycle events
//!
//! The simulation publishes here instead of talking to the network. Observers
//! are called synchronously in registration order and must not block: the
//! server's observers only push onto queues that other tasks drain.
//!
//! The subscriber list is copied before delivery, and each observer's
//! membership is re-checked right before it is called. An observer removed
//! while a publish is in progress therefore gets none of that publish's
//! remaining deliveries, and callbacks may subscribe or unsubscribe without
//! deadlocking.

use log::{info, trace};
use shared::Snake;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub trait SnakeObserver: Send + Sync {
    fn on_snake_updated(&self, snake: &Snake);
    fn on_snake_died(&self, snake: &Snake);
}

/// Handle returned by [`ObserverBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct ObserverBus {
    observers: RwLock<Vec<(ObserverId, Arc<dyn SnakeObserver>)>>,
    next_id: AtomicU64,
}

#[derive(Clone, Copy)]
enum Event {
    Updated,
    Died,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn SnakeObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    pub fn publish_updated(&self, snake: &Snake) {
        self.publish(snake, Event::Updated);
    }

    pub fn publish_died(&self, snake: &Snake) {
        self.publish(snake, Event::Died);
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_subscribed(&self, id: ObserverId) -> bool {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(observer_id, _)| *observer_id == id)
    }

    fn publish(&self, snake: &Snake, event: Event) {
        let targets: Vec<(ObserverId, Arc<dyn SnakeObserver>)> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, observer) in targets {
            if !self.is_subscribed(id) {
                continue;
            }
            match event {
                Event::Updated => observer.on_snake_updated(snake),
                Event::Died => observer.on_snake_died(snake),
            }
        }
    }
}

/// Logs snake events and counts them for the periodic server report.
#[derive(Debug, Default)]
pub struct EventLog {
    updates: AtomicU64,
    deaths: AtomicU64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn deaths(&self) -> u64 {
        self.deaths.load(Ordering::Relaxed)
    }
}

impl SnakeObserver for EventLog {
    fn on_snake_updated(&self, snake: &Snake) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if let Some(head) = snake.head() {
            trace!(
                "Snake '{}' at ({}, {}) length {}",
                snake.name,
                head.x,
                head.y,
                snake.len()
            );
        }
    }

    fn on_snake_died(&self, snake: &Snake) {
        self.deaths.fetch_add(1, Ordering::Relaxed);
        info!(
            "Snake '{}' ({}) died at length {}",
            snake.name,
            snake.connection_id,
            snake.len()
        );
    }
}
