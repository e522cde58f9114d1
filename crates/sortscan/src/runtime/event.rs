/// Ordered set of completion events that the next enqueued command depends on.
///
/// Lists are built by accumulation: each orchestration step takes the list it
/// must wait on and produces the list of events it left behind. A list passed to
/// an enqueue call is only borrowed, so it can never be changed by that call.
#[derive(Debug, Clone)]
pub struct EventWaitList<E> {
    events: Vec<E>,
}

impl<E> Default for EventWaitList<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E: Clone> EventWaitList<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(event: E) -> Self {
        Self {
            events: vec![event],
        }
    }

    pub fn push(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: EventWaitList<E>) {
        self.events.extend(other.events);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn last(&self) -> Option<&E> {
        self.events.last()
    }

    pub fn into_vec(self) -> Vec<E> {
        self.events
    }
}

impl<E> IntoIterator for EventWaitList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<E> FromIterator<E> for EventWaitList<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}
