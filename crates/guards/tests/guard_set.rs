use lorekeep_core::{ContentKind, Draft, Fact, FactPack, Registry};
use lorekeep_guards::{BALANCE_CHECK, Guard, GuardInput, GuardSet, PHYSICS_CHECK};
use serde_json::json;

fn cinder_drake() -> Draft {
    Draft {
        entity: json!({
            "name": "Cinder Drake",
            "speed": 40,
            "flySpeed": 80,
            "abilities": [
                {"name": "Smoldering Hide", "impact": "low", "usage": "passive"},
                {"name": "Heart of the Pyre", "impact": "legendary", "usage": "at will"}
            ]
        })
        .as_object()
        .cloned()
        .unwrap(),
        sources_used: vec!["f1".into()],
        assumptions: vec!["Drakes nest in old forges".into()],
        proposals: vec![],
        canon_change: "Adds the Cinder Drake to the Ashlands bestiary".into(),
    }
}

#[test]
fn unlimited_high_impact_ability_halts_balance_check() {
    let registry = Registry::default();
    let set = GuardSet::builtin(&registry);
    let draft = cinder_drake();
    let pack = FactPack {
        facts: vec![Fact::new("f1", "Drakes of the Ashlands breathe cinders.")],
        ..Default::default()
    };

    let results = set
        .evaluate_all(&GuardInput::new(ContentKind::Creature, &draft).with_fact_pack(&pack))
        .unwrap();

    let fact_check = &results[0];
    assert!(fact_check.ok);
    assert_eq!(fact_check.flags.len(), 1);

    let balance = results.iter().find(|r| r.guard == BALANCE_CHECK).unwrap();
    assert!(!balance.ok);
    assert_eq!(balance.errors.len(), 1);
    assert!(balance.errors[0].contains("Heart of the Pyre"));
    assert!(!balance.errors[0].contains("Smoldering Hide"));
    assert_eq!(balance.suggestions.len(), 1);

    let physics = results.iter().find(|r| r.guard == PHYSICS_CHECK).unwrap();
    assert!(physics.ok && !physics.skipped);
}

#[test]
fn configured_bounds_apply() {
    let mut registry = Registry::default();
    registry
        .bounds
        .rules
        .retain(|r| r.field != "flySpeed");
    registry
        .bounds
        .rules
        .push(lorekeep_core::BoundRule::new("flySpeed", 0.0, 50.0));

    let set = GuardSet::builtin(&registry);
    let draft = cinder_drake();
    let pack = FactPack::default();
    let physics = set
        .get(PHYSICS_CHECK)
        .unwrap()
        .evaluate(&GuardInput::new(ContentKind::Creature, &draft).with_fact_pack(&pack))
        .unwrap();
    assert!(!physics.ok);
    assert!(physics.errors[0].starts_with("flySpeed = 80"));
}

fn with_speed(speed: i64, overridden: bool) -> Draft {
    let mut draft = cinder_drake();
    draft.entity.insert("speed".into(), json!(speed));
    draft.entity.remove("abilities");
    if overridden {
        draft.entity.insert("boundsOverride".into(), json!(true));
    }
    draft
}

proptest::proptest! {
    #[test]
    fn speed_within_bounds_always_passes(speed in 0i64..=120) {
        let guard = lorekeep_guards::BoundsGuard::new(Registry::default().bounds);
        let draft = with_speed(speed, false);
        let result = guard.evaluate(&GuardInput::new(ContentKind::Creature, &draft)).unwrap();
        proptest::prop_assert!(result.ok);
        proptest::prop_assert!(result.flags.is_empty());
    }

    #[test]
    fn override_turns_violations_into_flags(speed in 121i64..10_000, overridden in proptest::bool::ANY) {
        let guard = lorekeep_guards::BoundsGuard::new(Registry::default().bounds);
        let draft = with_speed(speed, overridden);
        let result = guard.evaluate(&GuardInput::new(ContentKind::Creature, &draft)).unwrap();
        proptest::prop_assert_eq!(result.ok, overridden);
        proptest::prop_assert_eq!(result.flags.len(), usize::from(overridden));
    }
}
