//! Subscriber bookkeeping for the event bus.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keel_protocols::event::{Event, EventHandler, Topic};

/// Optional predicate evaluated before a handler is invoked.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Clone)]
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) filter: Option<EventFilter>,
}

/// Two indexes: wildcard subscribers and exact-topic subscribers, each in
/// subscription order.
#[derive(Default)]
pub(crate) struct Subscriptions {
    wildcard: Vec<Subscription>,
    exact: HashMap<String, Vec<Subscription>>,
}

impl Subscriptions {
    pub(crate) fn insert(&mut self, topic: Topic, subscription: Subscription) {
        match topic {
            Topic::Wildcard => self.wildcard.push(subscription),
            Topic::Exact(topic) => self.exact.entry(topic).or_default().push(subscription),
        }
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        if let Some(pos) = self.wildcard.iter().position(|s| s.id == id) {
            self.wildcard.remove(pos);
            return true;
        }

        let mut emptied = None;
        let mut found = false;
        for (topic, subscribers) in self.exact.iter_mut() {
            if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                subscribers.remove(pos);
                if subscribers.is_empty() {
                    emptied = Some(topic.clone());
                }
                found = true;
                break;
            }
        }
        if let Some(topic) = emptied {
            self.exact.remove(&topic);
        }
        found
    }

    /// Handlers for `event_type`: wildcard subscribers first, then exact.
    pub(crate) fn matching(&self, event_type: &str) -> Vec<Subscription> {
        let exact = self.exact.get(event_type).map(Vec::as_slice).unwrap_or(&[]);
        self.wildcard.iter().chain(exact).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.wildcard.len() + self.exact.values().map(Vec::len).sum::<usize>()
    }

    pub(crate) fn topic_count(&self, topic: &Topic) -> usize {
        match topic {
            Topic::Wildcard => self.wildcard.len(),
            Topic::Exact(topic) => self.exact.get(topic).map(Vec::len).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_protocols::event::handler_fn;

    fn subscription(id: u64) -> Subscription {
        Subscription {
            id: SubscriptionId(id),
            handler: Arc::new(handler_fn(|_event: Event| async { Ok(()) })),
            filter: None,
        }
    }

    #[test]
    fn test_matching_orders_wildcard_first() {
        let mut subs = Subscriptions::default();
        subs.insert(Topic::from("ping"), subscription(1));
        subs.insert(Topic::Wildcard, subscription(2));
        subs.insert(Topic::from("ping"), subscription(3));
        subs.insert(Topic::from("pong"), subscription(4));

        let ids: Vec<u64> = subs.matching("ping").iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(subs.len(), 4);
    }

    #[test]
    fn test_remove_subscription() {
        let mut subs = Subscriptions::default();
        subs.insert(Topic::from("ping"), subscription(1));
        subs.insert(Topic::Wildcard, subscription(2));

        assert!(subs.remove(SubscriptionId(1)));
        assert!(!subs.remove(SubscriptionId(1)));
        assert_eq!(subs.topic_count(&Topic::from("ping")), 0);
        assert!(subs.remove(SubscriptionId(2)));
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId(7).to_string(), "sub-7");
    }
}
