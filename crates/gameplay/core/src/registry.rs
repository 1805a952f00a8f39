use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::aggregator::AggregatorRef;
use crate::attribute::AttributeId;

/// Receiver of attribute-level dirty notifications.
///
/// `from_recursive` is true when the broadcast hit the depth ceiling; sinks
/// should refresh cached values but not notify general listeners.
pub trait AttributeChangeSink {
    fn on_attribute_aggregator_dirty(
        &self,
        attribute: &AttributeId,
        aggregator: &AggregatorRef,
        from_recursive: bool,
    );
}

/// One aggregator per attribute, created on first use.
#[derive(Default)]
pub struct AggregatorRegistry {
    aggregators: BTreeMap<AttributeId, AggregatorRef>,
    sink: Option<Weak<dyn AttributeChangeSink>>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose aggregators route dirty broadcasts to `sink`.
    pub fn with_sink(sink: Weak<dyn AttributeChangeSink>) -> Self {
        Self {
            aggregators: BTreeMap::new(),
            sink: Some(sink),
        }
    }

    pub fn find(&self, attribute: &AttributeId) -> Option<AggregatorRef> {
        self.aggregators.get(attribute).cloned()
    }

    /// Returns the attribute's aggregator, creating it with `base_value` if needed.
    ///
    /// New aggregators get both dirty delegates bound to the sink for `attribute`.
    pub fn find_or_create(&mut self, attribute: &AttributeId, base_value: f32) -> AggregatorRef {
        if let Some(existing) = self.aggregators.get(attribute) {
            return existing.clone();
        }

        tracing::debug!("Creating aggregator for {} with base value {}", attribute, base_value);
        let aggregator = AggregatorRef::new(base_value);
        if let Some(sink) = &self.sink {
            aggregator.add_on_dirty(route(sink.clone(), attribute.clone(), false));
            aggregator.add_on_dirty_recursive(route(sink.clone(), attribute.clone(), true));
        }
        self.aggregators.insert(attribute.clone(), aggregator.clone());
        aggregator
    }

    /// Drops the registry's entry. Outstanding captures of the aggregator keep it alive.
    pub fn remove(&mut self, attribute: &AttributeId) -> Option<AggregatorRef> {
        self.aggregators.remove(attribute)
    }

    /// Forwards a dirty notification for `attribute` to the sink, if one is bound and alive.
    pub fn route_dirty(&self, attribute: &AttributeId, aggregator: &AggregatorRef, from_recursive: bool) {
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.on_attribute_aggregator_dirty(attribute, aggregator, from_recursive);
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeId> {
        self.aggregators.keys()
    }

    pub fn len(&self) -> usize {
        self.aggregators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }
}

fn route(
    sink: Weak<dyn AttributeChangeSink>,
    attribute: AttributeId,
    from_recursive: bool,
) -> Rc<dyn Fn(&AggregatorRef)> {
    Rc::new(move |aggregator| {
        if let Some(sink) = sink.upgrade() {
            sink.on_attribute_aggregator_dirty(&attribute, aggregator, from_recursive);
        }
    })
}
