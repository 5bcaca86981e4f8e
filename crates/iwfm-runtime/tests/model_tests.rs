// Model handle lifecycle against the stub engine

mod common;

use chrono::NaiveDate;
use common::{engine, stub_binding};
use iwfm_runtime::model::{ModelHandle, ModelInputs, ModelState, QuantityKind};
use iwfm_runtime::{BindingOptions, IwfmError, Slot, UnitKind, UnitSystem};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;

fn inputs() -> ModelInputs {
    ModelInputs::new("Preprocessor/PP_MAIN.IN", "Simulation/SIM_MAIN.IN")
}

fn open_model() -> ModelHandle {
    let binding = stub_binding(BindingOptions::default());
    ModelHandle::open(binding, inputs()).unwrap()
}

// ============================================================================
// Instantiation
// ============================================================================

#[test]
#[serial]
fn test_instantiate_passes_inputs() {
    let model = open_model();

    assert_eq!(model.state(), ModelState::Instantiated);
    assert!(model.token_id().is_some());
    let engine = engine();
    assert!(engine.model_alive);
    assert_eq!(
        engine.model_inputs,
        vec!["Preprocessor/PP_MAIN.IN", "Simulation/SIM_MAIN.IN"]
    );
    assert!(!engine.for_inquiry);
}

#[test]
#[serial]
fn test_failed_instantiation_stays_uninitialized() {
    let binding = stub_binding(BindingOptions::default());
    engine().fail("IW_Model_New", 3);

    let mut model = ModelHandle::new(binding.clone());
    let err = model.instantiate(&inputs()).unwrap_err();

    assert_eq!(err, IwfmError::Instantiation { status: 3 });
    assert_eq!(model.state(), ModelState::Uninitialized);
    assert_eq!(model.token_id(), None);
    assert!(!binding.is_claimed(Slot::Model));
}

#[test]
#[serial]
fn test_one_live_model_per_engine() {
    let binding = stub_binding(BindingOptions::default());
    let mut first = ModelHandle::open(binding.clone(), inputs()).unwrap();
    let first_token = first.token_id();

    let second = ModelHandle::open(binding.clone(), inputs());
    assert!(matches!(second, Err(IwfmError::EngineBusy { resource: "model" })));
    assert_eq!(engine().count("IW_Model_New"), 1);

    first.release().unwrap();
    let second = ModelHandle::open(binding, inputs()).unwrap();
    assert!(second.token_id().is_some());
    assert_ne!(second.token_id(), first_token);
}

#[test]
#[serial]
fn test_instantiate_twice_rejected() {
    let mut model = open_model();
    let err = model.instantiate(&inputs()).unwrap_err();
    assert!(matches!(
        err,
        IwfmError::InvalidHandle {
            operation: "instantiate",
            state: "instantiated"
        }
    ));
}

// ============================================================================
// Stepping
// ============================================================================

#[test]
#[serial]
fn test_advance_step_runs_engine_sequence() {
    let mut model = open_model();
    engine().calls.clear();

    let clock = model.advance_step().unwrap();

    assert_eq!(clock.step, 1);
    assert_eq!(
        clock.timestamp,
        Some(NaiveDate::from_ymd_opt(1990, 11, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
    );
    assert_eq!(model.state(), ModelState::Stepping);
    assert_eq!(
        engine().calls,
        vec![
            "IW_Model_IsEndOfSimulation",
            "IW_Model_AdvanceTime",
            "IW_Model_ReadTSData",
            "IW_Model_SimulateForOneTimeStep",
            "IW_Model_PrintResults",
            "IW_Model_AdvanceState",
            "IW_Model_GetCurrentDateAndTime",
        ]
    );
}

#[test]
#[serial]
fn test_run_to_end_then_complete() {
    let mut model = open_model();

    assert_eq!(model.run_to_end().unwrap(), 3);
    assert_eq!(model.clock().step, 3);

    // the end of the simulation does not poison the handle
    assert_eq!(model.advance_step().unwrap_err(), IwfmError::SimulationComplete);
    assert_eq!(model.state(), ModelState::Stepping);
    assert!(model.query_state(1, QuantityKind::StreamFlow).is_ok());
}

#[test]
#[serial]
fn test_step_failure_poisons() {
    let mut model = open_model();
    engine().fail("IW_Model_SimulateForOneTimeStep", 2);

    let err = model.advance_step().unwrap_err();
    assert_eq!(
        err,
        IwfmError::NativeStatus {
            procedure: "IW_Model_SimulateForOneTimeStep",
            status: 2
        }
    );
    assert_eq!(model.state(), ModelState::Poisoned);
    assert_eq!(model.clock().step, 0);

    let calls = engine().total_calls();
    assert!(matches!(
        model.query_state(1, QuantityKind::StreamFlow),
        Err(IwfmError::PoisonedHandle { .. })
    ));
    assert!(matches!(model.advance_step(), Err(IwfmError::PoisonedHandle { .. })));
    assert_eq!(engine().total_calls(), calls);

    // a poisoned model can still be released
    model.release().unwrap();
    assert_eq!(engine().count("IW_Model_Kill"), 1);
}

#[test]
#[serial]
fn test_inquiry_model_refuses_to_step() {
    let binding = stub_binding(BindingOptions::default());
    let mut model = ModelHandle::open(binding, inputs().for_inquiry(true)).unwrap();
    assert!(engine().for_inquiry);

    let calls = engine().total_calls();
    assert_eq!(model.advance_step().unwrap_err(), IwfmError::InquiryOnly);
    assert_eq!(engine().total_calls(), calls);
    assert_eq!(model.state(), ModelState::Instantiated);
}

// ============================================================================
// Queries
// ============================================================================

#[rstest]
#[case(1, 1)]
#[case(3, 2)]
#[case(4, 1)]
#[serial]
fn test_query_groundwater_head(#[case] node: i64, #[case] layer: usize) {
    let model = open_model();
    let value = model
        .query_state(node, QuantityKind::GroundwaterHead { layer })
        .unwrap();

    assert_eq!(value.value, common::head(node as i32, layer as i32));
    assert_eq!(value.unit.kind, UnitKind::Length);
    assert_eq!(value.unit.label, "feet");
}

#[test]
#[serial]
fn test_query_converts_units() {
    let model = open_model().with_units(UnitSystem::metric());
    let head = model
        .query_state(2, QuantityKind::GroundwaterHead { layer: 1 })
        .unwrap();
    assert!((head.value - common::head(2, 1) * 0.3048).abs() < 1e-9);
    assert_eq!(head.unit.label, "meters");

    drop(model);

    let model = open_model();
    let flow = model.query_state(2, QuantityKind::StreamFlow).unwrap();
    assert!((flow.value - common::flow(2) / 43_560.0).abs() < 1e-9);
    assert_eq!(flow.unit.label, "acre-feet");
}

#[rstest]
#[case(0, QuantityKind::StreamFlow)]
#[case(4, QuantityKind::StreamFlow)]
#[case(5, QuantityKind::GroundwaterHead { layer: 1 })]
#[case(1, QuantityKind::GroundwaterHead { layer: 0 })]
#[case(1, QuantityKind::GroundwaterHead { layer: 3 })]
#[serial]
fn test_query_out_of_range(#[case] location: i64, #[case] kind: QuantityKind) {
    let model = open_model();
    assert!(matches!(
        model.query_state(location, kind),
        Err(IwfmError::InvalidQuery(_))
    ));
    assert_eq!(model.state(), ModelState::Instantiated);
}

#[test]
#[serial]
fn test_query_failure_does_not_poison() {
    let mut model = open_model();
    engine().fail("IW_Model_GetStrmFlows", 9);

    assert!(matches!(
        model.query_state(1, QuantityKind::StreamFlow),
        Err(IwfmError::NativeStatus { status: 9, .. })
    ));
    assert_eq!(model.state(), ModelState::Instantiated);
    assert_eq!(model.advance_step().unwrap().step, 1);
}

#[test]
#[serial]
fn test_query_does_not_move_clock() {
    let mut model = open_model();
    model.advance_step().unwrap();
    let before = model.clock();
    model.query_state(1, QuantityKind::StreamFlow).unwrap();
    assert_eq!(model.clock(), before);
}

#[test]
#[serial]
fn test_inquiry_operations() {
    let model = open_model();

    assert_eq!(model.node_count().unwrap(), common::N_NODES as usize);
    assert_eq!(model.layer_count().unwrap(), common::N_LAYERS as usize);
    assert_eq!(model.stream_node_count().unwrap(), common::N_STREAM_NODES as usize);
    assert_eq!(model.subregion_count().unwrap(), 2);
    assert_eq!(model.subregion_ids().unwrap(), common::SUBREGION_IDS.to_vec());

    let xy = model.node_coordinates().unwrap();
    assert_eq!(xy.x, vec![0.0, 1000.0, 2000.0, 3000.0]);
    assert_eq!(xy.y[3], -1500.0);

    let specs = model.time_specs().unwrap();
    assert_eq!(specs.begin, NaiveDate::from_ymd_opt(1990, 10, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
    assert_eq!(specs.end, NaiveDate::from_ymd_opt(1991, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
    assert_eq!(specs.interval, "1MON");
    assert!(!model.is_end_of_simulation().unwrap());
}

// ============================================================================
// Release
// ============================================================================

#[test]
#[serial]
fn test_release_kills_exactly_once() {
    let mut model = open_model();

    model.release().unwrap();
    model.release().unwrap();
    drop(model);

    let engine = engine();
    assert_eq!(engine.count("IW_Model_Kill"), 1);
    assert!(!engine.model_alive);
}

#[test]
#[serial]
fn test_released_handle_makes_no_calls() {
    let mut model = open_model();
    model.release().unwrap();
    let calls = engine().total_calls();

    assert!(matches!(
        model.query_state(1, QuantityKind::StreamFlow),
        Err(IwfmError::InvalidHandle { state: "released", .. })
    ));
    assert!(matches!(model.advance_step(), Err(IwfmError::InvalidHandle { .. })));
    assert!(matches!(model.node_count(), Err(IwfmError::InvalidHandle { .. })));
    assert_eq!(engine().total_calls(), calls);
}

#[test]
#[serial]
fn test_release_uninitialized_makes_no_call() {
    let binding = stub_binding(BindingOptions::default());
    let mut model = ModelHandle::new(binding);

    model.release().unwrap();
    assert_eq!(model.state(), ModelState::Released);
    assert_eq!(engine().total_calls(), 0);
}

#[test]
#[serial]
fn test_failed_kill_still_releases() {
    let binding = stub_binding(BindingOptions::default());
    let mut model = ModelHandle::open(binding.clone(), inputs()).unwrap();
    engine().fail("IW_Model_Kill", 5);

    let err = model.release().unwrap_err();
    assert_eq!(
        err,
        IwfmError::NativeStatus {
            procedure: "IW_Model_Kill",
            status: 5
        }
    );
    assert_eq!(model.state(), ModelState::Released);
    assert!(!binding.is_claimed(Slot::Model));
    model.release().unwrap();
    assert_eq!(engine().count("IW_Model_Kill"), 1);
}

#[test]
#[serial]
fn test_drop_releases_live_model() {
    let binding = stub_binding(BindingOptions::default());
    {
        let mut model = ModelHandle::open(binding.clone(), inputs()).unwrap();
        model.advance_step().unwrap();
    }
    assert_eq!(engine().count("IW_Model_Kill"), 1);
    assert!(!binding.is_claimed(Slot::Model));
}

#[test]
#[serial]
fn test_released_handle_cannot_instantiate() {
    let mut model = open_model();
    model.release().unwrap();
    let calls = engine().total_calls();

    assert!(matches!(
        model.instantiate(&inputs()),
        Err(IwfmError::InvalidHandle {
            operation: "instantiate",
            state: "released"
        })
    ));
    assert_eq!(engine().total_calls(), calls);
}

#[test]
fn test_handle_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<ModelHandle>();
}
