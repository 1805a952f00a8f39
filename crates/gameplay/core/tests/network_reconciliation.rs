mod support;

use std::rc::Rc;

use gameplay_core::{
    AggregatorConfig, AttributeComponent, AttributeId, AttributeTable, DirtyBatch, DurationPolicy,
    EffectDef, MagnitudeDef, ModifierDef, ModifierOp,
};
use support::{approx_eq, record_changes};

fn proxy() -> Rc<AttributeComponent> {
    let proxy = AttributeComponent::new(
        AttributeTable::new().with("Health", 100.0).with("Stamina", 50.0),
        AggregatorConfig::default(),
    );
    proxy.set_net_simulating(true);
    proxy
}

fn infinite(name: &str, attribute: &str, op: ModifierOp, magnitude: f32) -> Rc<EffectDef> {
    Rc::new(EffectDef::new(name, DurationPolicy::Infinite).with_modifier(ModifierDef::new(
        attribute,
        op,
        MagnitudeDef::Scalable(magnitude),
    )))
}

#[test]
fn replicated_values_keep_local_predictions_on_top() {
    let proxy = proxy();
    let health = AttributeId::new("Health");

    let spec = proxy.make_outgoing_spec(infinite("Predicted heal", "Health", ModifierOp::Additive, 10.0));
    proxy.apply_effect_spec_to_self(&spec, true).expect("applies");
    assert_eq!(proxy.numeric_attribute(&health), Some(110.0));

    // The server has not seen the prediction and reports its own final value.
    proxy.receive_replicated_attribute(&health, 150.0);

    assert_eq!(proxy.numeric_attribute_base(&health), Some(150.0));
    assert_eq!(proxy.numeric_attribute(&health), Some(160.0));

    let aggregator = proxy.aggregator(&health).expect("created on apply");
    assert_eq!(aggregator.net_update_id(), DirtyBatch::net_update_id());
    assert!(!DirtyBatch::is_from_network_update());
    assert!(!DirtyBatch::is_locked());
}

#[test]
fn authoritative_modifiers_are_reversed_out_of_the_base() {
    let proxy = proxy();
    let stamina = AttributeId::new("Stamina");

    let server_mod = proxy.make_outgoing_spec(infinite("Endurance", "Stamina", ModifierOp::Multiplicative, 2.0));
    proxy.apply_effect_spec_to_self(&server_mod, false).expect("applies");
    let predicted = proxy.make_outgoing_spec(infinite("Second wind", "Stamina", ModifierOp::Additive, 10.0));
    proxy.apply_effect_spec_to_self(&predicted, true).expect("applies");

    // Server: base 40, doubled.
    proxy.receive_replicated_attribute(&stamina, 80.0);

    let base = proxy.numeric_attribute_base(&stamina).expect("owned");
    let current = proxy.numeric_attribute(&stamina).expect("owned");
    assert!(approx_eq(base, 40.0), "base {base}");
    assert!(approx_eq(current, 100.0), "current {current}");
}

#[test]
fn nested_locks_collapse_into_one_network_flush() {
    let proxy = proxy();
    let health = AttributeId::new("Health");
    let spec = proxy.make_outgoing_spec(infinite("Ward", "Health", ModifierOp::Additive, 5.0));
    proxy.apply_effect_spec_to_self(&spec, false).expect("applies");
    let changes = record_changes(&proxy, "Health");

    DirtyBatch::begin_lock();
    proxy.receive_replicated_attribute(&health, 70.0);

    // The net receive lock forced the outer lock closed as well.
    assert!(!DirtyBatch::is_locked());
    assert_eq!(proxy.numeric_attribute_base(&health), Some(65.0));
    assert_eq!(proxy.numeric_attribute(&health), Some(70.0));
    assert_eq!(changes.borrow().len(), 1);
}

#[test]
fn attributes_without_aggregators_take_the_value_directly() {
    let proxy = proxy();
    let stamina = AttributeId::new("Stamina");
    let changes = record_changes(&proxy, "Stamina");

    proxy.receive_replicated_attribute(&stamina, 35.0);

    assert_eq!(proxy.numeric_attribute(&stamina), Some(35.0));
    assert_eq!(proxy.numeric_attribute_base(&stamina), Some(35.0));
    assert_eq!(changes.borrow().as_slice(), &[(50.0, 35.0)]);
}
